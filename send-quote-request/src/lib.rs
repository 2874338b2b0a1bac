//! Backend for the "request a quote" form.
//!
//! Submissions are validated, optionally screened with a CAPTCHA, and forwarded as an HTML email
//! to the sales inbox. The same [`handler::QuoteRequestHandler`] serves both the AWS Lambda
//! entry point and the standalone HTTP server.

pub mod captcha;
pub mod config;
pub mod cors;
pub mod delivery;
pub mod handler;
pub mod notification;
pub mod quote;
pub mod resend;
pub mod server;
pub mod smtp;
