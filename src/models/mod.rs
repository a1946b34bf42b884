pub mod gigmodel;
