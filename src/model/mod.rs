pub mod ctc_model;
pub(crate) mod encoder;
