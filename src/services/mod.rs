pub mod gateway;
pub mod gemini;
pub mod http;
pub mod normalize;
pub mod workflow;
