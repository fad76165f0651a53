//! Mappings between stored variations.

pub mod liftover;
