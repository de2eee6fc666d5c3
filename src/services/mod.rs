pub mod composer;
pub mod document_crypto;
pub mod pdf_security;
pub mod pipeline;
pub mod rasterizer;
pub mod staging;
pub mod worker;
