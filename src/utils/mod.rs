pub mod process;
pub mod size;
