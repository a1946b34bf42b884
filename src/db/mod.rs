pub mod db;
pub mod gigdb;
#[cfg(test)]
pub mod memory;
