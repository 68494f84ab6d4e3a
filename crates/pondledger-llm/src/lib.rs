// Library root for the model-facing layer: the Claude client, prompt
// templates, and the extraction wrappers built on them.

pub mod client;
pub mod extractor;
pub mod prompt;
pub mod receipt;
pub mod reply;
