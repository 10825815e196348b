pub mod decode;
pub mod listing;
pub mod run;
