// Capability Clients
//
// HTTP implementations of the capability traits defined in
// inbound-durable. Steps only ever see the traits; the worker picks these
// clients up from configuration at startup.

mod chat;
mod client;
mod document;
mod language;
mod translator;
mod vision;

#[cfg(test)]
mod tests;

pub use chat::{ChatDescriber, CHAT_API_VERSION};
pub use client::{http_client, ServiceConfig, SUBSCRIPTION_KEY_HEADER};
pub use document::{DocumentAnalysisClient, DOCUMENT_API_VERSION};
pub use language::{LanguageClient, LANGUAGE_API_VERSION};
pub use translator::{TranslatorClient, TRANSLATOR_API_VERSION};
pub use vision::{ImageAnalysisClient, VISION_API_VERSION, VISION_FEATURES};

// Re-export the traits for convenience
pub use inbound_durable::capability::{
    CapabilityError, DocumentAnalyzer, ImageAnalyzer, ImageDescriber, LanguageDetector,
    PiiRedactor, Translator,
};
