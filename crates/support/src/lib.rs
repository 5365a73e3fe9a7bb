pub mod constants;
pub mod fs;
pub mod process;
