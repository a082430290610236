// Session orchestration for the voice shopping list server.

pub mod app;
