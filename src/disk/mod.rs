//! Floppy disk model: controller and media

pub mod image;
pub mod wd1770;
