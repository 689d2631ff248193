pub mod preview;
pub mod processors;
pub mod run;
pub mod validate;
