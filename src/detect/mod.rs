// Content-type detection from file names.

pub mod mime;
