//! Settings read from the process environment.
//!
//! Everything is read once at startup. Loading goes through a lookup function so tests can
//! supply settings without touching the environment of the test process.

use crate::{
    captcha::{RecaptchaVerifier, RECAPTCHA_VERIFY_URL},
    cors::CorsPolicy,
    delivery::Mailer,
    handler::{Envelope, Services},
    quote::PhonePolicy,
    resend::{ResendClient, RESEND_API_URL},
    smtp::{SmtpCredentials, SmtpMailer},
};
use lettre::{message::Mailbox, Address};
use std::{fmt::Debug, net::SocketAddr};

pub const MAIL_FROM: &str = "MAIL_FROM";
pub const MAIL_FROM_NAME: &str = "MAIL_FROM_NAME";
pub const MAIL_TO: &str = "MAIL_TO";
pub const MAIL_TRANSPORT: &str = "MAIL_TRANSPORT";
pub const RESEND_API_KEY: &str = "RESEND_API_KEY";
pub const RESEND_API_URL_KEY: &str = "RESEND_API_URL";
pub const SMTP_URL: &str = "SMTP_URL";
pub const SMTP_USERNAME: &str = "SMTP_USERNAME";
pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const RECAPTCHA_SECRET: &str = "RECAPTCHA_SECRET";
pub const RECAPTCHA_VERIFY_URL_KEY: &str = "RECAPTCHA_VERIFY_URL";
pub const PHONE_POLICY: &str = "PHONE_POLICY";
pub const ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const EXPOSE_ERROR_DETAILS: &str = "EXPOSE_ERROR_DETAILS";
pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

const DEFAULT_FROM_NAME: &str = "Quotes";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("Could not initialise {collaborator}: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
}

/// Reads a variable from the process environment.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Looks up a setting, treating blank values as unset.
fn get(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    get(lookup, key)
        .map(|value| {
            value.parse().map_err(|error: T::Err| ConfigurationError::Invalid {
                key,
                reason: error.to_string(),
            })
        })
        .transpose()
}

/// Request handling options which apply whether or not mail delivery is configured.
#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    pub cors: CorsPolicy,
    pub phone_policy: PhonePolicy,
    pub expose_error_details: bool,
}

impl HandlerOptions {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let cors = match get(&lookup, ALLOWED_ORIGINS) {
            Some(origins) => {
                CorsPolicy::new(origins.split(',')).ok_or(ConfigurationError::Invalid {
                    key: ALLOWED_ORIGINS,
                    reason: "no usable origin".into(),
                })?
            }
            None => CorsPolicy::default(),
        };
        let expose_error_details = match get(&lookup, EXPOSE_ERROR_DETAILS).as_deref() {
            None | Some("false" | "0" | "no") => false,
            Some("true" | "1" | "yes") => true,
            Some(_) => {
                return Err(ConfigurationError::Invalid {
                    key: EXPOSE_ERROR_DETAILS,
                    reason: "expected true or false".into(),
                })
            }
        };
        Ok(Self {
            cors,
            phone_policy: parse(&lookup, PHONE_POLICY)?.unwrap_or_default(),
            expose_error_details,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Resend,
    Smtp,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resend" => Ok(TransportKind::Resend),
            "smtp" => Ok(TransportKind::Smtp),
            other => Err(format!(
                "unknown transport {other:?}, expected \"resend\" or \"smtp\""
            )),
        }
    }
}

pub enum TransportSettings {
    Resend {
        api_key: String,
        api_url: String,
    },
    Smtp {
        url: String,
        credentials: Option<SmtpCredentials>,
    },
}

impl Debug for TransportSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportSettings::Resend { api_url, .. } => f
                .debug_struct("Resend")
                .field("api_key", &"<redacted>")
                .field("api_url", api_url)
                .finish(),
            TransportSettings::Smtp { credentials, .. } => f
                .debug_struct("Smtp")
                .field("url", &"<redacted>")
                .field("has_credentials", &credentials.is_some())
                .finish(),
        }
    }
}

pub struct CaptchaSettings {
    pub secret: String,
    pub verify_url: String,
}

impl Debug for CaptchaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptchaSettings")
            .field("secret", &"<redacted>")
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

/// Everything needed to deliver notifications.
#[derive(Debug)]
pub struct MailSettings {
    pub envelope: Envelope,
    pub transport: TransportSettings,
    pub captcha: Option<CaptchaSettings>,
}

impl MailSettings {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let transport_kind = parse(&lookup, MAIL_TRANSPORT)?.unwrap_or(TransportKind::Resend);
        let mut missing = Vec::new();
        let mut require = |key: &'static str| {
            let value = get(&lookup, key);
            if value.is_none() {
                missing.push(key);
            }
            value
        };
        let mail_from = require(MAIL_FROM);
        let mail_to = require(MAIL_TO);
        let transport_secret = match transport_kind {
            TransportKind::Resend => require(RESEND_API_KEY),
            TransportKind::Smtp => require(SMTP_URL),
        };
        let (Some(mail_from), Some(mail_to), Some(transport_secret)) =
            (mail_from, mail_to, transport_secret)
        else {
            return Err(ConfigurationError::Missing(missing));
        };

        let from_address: Address = mail_from.parse().map_err(|error: lettre::address::AddressError| {
            ConfigurationError::Invalid {
                key: MAIL_FROM,
                reason: error.to_string(),
            }
        })?;
        let from_name = get(&lookup, MAIL_FROM_NAME).unwrap_or_else(|| DEFAULT_FROM_NAME.into());
        let to: Mailbox = mail_to.parse().map_err(|error: lettre::address::AddressError| {
            ConfigurationError::Invalid {
                key: MAIL_TO,
                reason: error.to_string(),
            }
        })?;

        let transport = match transport_kind {
            TransportKind::Resend => TransportSettings::Resend {
                api_key: transport_secret,
                api_url: get(&lookup, RESEND_API_URL_KEY).unwrap_or_else(|| RESEND_API_URL.into()),
            },
            TransportKind::Smtp => TransportSettings::Smtp {
                url: transport_secret,
                credentials: match (get(&lookup, SMTP_USERNAME), get(&lookup, SMTP_PASSWORD)) {
                    (Some(username), Some(password)) => Some(SmtpCredentials { username, password }),
                    _ => None,
                },
            },
        };
        let captcha = get(&lookup, RECAPTCHA_SECRET).map(|secret| CaptchaSettings {
            secret,
            verify_url: get(&lookup, RECAPTCHA_VERIFY_URL_KEY)
                .unwrap_or_else(|| RECAPTCHA_VERIFY_URL.into()),
        });

        Ok(Self {
            envelope: Envelope {
                from: Mailbox::new(Some(from_name), from_address),
                to,
            },
            transport,
            captcha,
        })
    }
}

impl Services<Mailer, RecaptchaVerifier> {
    /// Connects the collaborators named by `settings`.
    pub fn from_settings(settings: MailSettings) -> Result<Self, ConfigurationError> {
        let delivery = match settings.transport {
            TransportSettings::Resend { api_key, api_url } => Mailer::Resend(
                ResendClient::new(api_key, &api_url).map_err(|error| {
                    ConfigurationError::Unavailable {
                        collaborator: "Resend client",
                        reason: error.to_string(),
                    }
                })?,
            ),
            TransportSettings::Smtp { url, credentials } => Mailer::Smtp(
                SmtpMailer::new(&url, credentials).map_err(|error| ConfigurationError::Invalid {
                    key: SMTP_URL,
                    reason: error.to_string(),
                })?,
            ),
        };
        let captcha_verifier = settings
            .captcha
            .map(|captcha| {
                RecaptchaVerifier::new(captcha.secret, captcha.verify_url).map_err(|error| {
                    ConfigurationError::Unavailable {
                        collaborator: "CAPTCHA client",
                        reason: error.to_string(),
                    }
                })
            })
            .transpose()?;
        Ok(Self {
            envelope: settings.envelope,
            delivery,
            captcha_verifier,
        })
    }
}

pub fn services_from_env() -> Result<Services<Mailer, RecaptchaVerifier>, ConfigurationError> {
    services_from_lookup(env_lookup)
}

pub fn services_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Services<Mailer, RecaptchaVerifier>, ConfigurationError> {
    Services::from_settings(MailSettings::from_lookup(lookup)?)
}

/// The address the standalone server binds to.
pub fn listen_address(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SocketAddr, ConfigurationError> {
    let host = get(&lookup, HOST).unwrap_or_else(|| DEFAULT_HOST.into());
    let port = parse(&lookup, PORT)?.unwrap_or(DEFAULT_PORT);
    let ip = host.parse().map_err(|error: std::net::AddrParseError| ConfigurationError::Invalid {
        key: HOST,
        reason: error.to_string(),
    })?;
    Ok(SocketAddr::new(ip, port))
}
