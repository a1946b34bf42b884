pub mod cell;
pub mod escrow;
pub mod provider;
pub mod sequencer;
pub mod wallet;
