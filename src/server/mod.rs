// Local HTTP endpoint the media player pulls from.

pub mod handler;
