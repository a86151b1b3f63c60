//! netlogo-lucim - Convert NetLogo models into LUCIM PlantUML diagrams
//!
//! Sends a NetLogo case, its interface screenshots and a persona set to an LLM,
//! then runs a bounded audit/correction loop until the diagram is LUCIM
//! compliant or the round limit is reached. Supports OpenAI, Gemini, OpenRouter
//! and OpenAI-compatible gateways.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod util;
