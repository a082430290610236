// Language-model adapters: the Gemini streaming client plus the intent,
// recommendation, and translation collaborators built on HTTP.

pub mod client;
pub mod intent;
pub mod prompt;
pub mod recommend;
pub mod translate;
