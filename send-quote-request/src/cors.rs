use http::{
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        VARY,
    },
    HeaderMap, HeaderValue,
};
use tracing::warn;

/// Origins the site is served from. The first entry is the canonical origin.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "https://www.motshete.com",
    "https://motshete.com",
    "http://localhost:5173",
    "http://localhost:3000",
];

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";

/// Echoes allowlisted origins and answers everything else with the canonical origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorsPolicy {
    canonical_origin: HeaderValue,
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    /// Builds a policy from an allowlist whose first entry is the canonical origin. Entries
    /// which cannot be used as header values are skipped.
    pub fn new<S: AsRef<str>>(origins: impl IntoIterator<Item = S>) -> Option<Self> {
        let allowed_origins = origins
            .into_iter()
            .map(|origin| origin.as_ref().trim().to_string())
            .filter(|origin| {
                if origin.is_empty() {
                    return false;
                }
                let usable = HeaderValue::from_str(origin).is_ok();
                if !usable {
                    warn!("Ignoring CORS origin {origin:?}: not a valid header value");
                }
                usable
            })
            .collect::<Vec<_>>();
        let canonical_origin = HeaderValue::from_str(allowed_origins.first()?).ok()?;
        Some(Self {
            canonical_origin,
            allowed_origins,
        })
    }

    pub fn canonical_origin(&self) -> &str {
        self.allowed_origins[0].as_str()
    }

    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        let allow_origin = origin
            .filter(|origin| {
                origin
                    .to_str()
                    .is_ok_and(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
            })
            .unwrap_or(&self.canonical_origin)
            .clone();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(VARY, HeaderValue::from_static("Origin"));
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            canonical_origin: HeaderValue::from_static(DEFAULT_ALLOWED_ORIGINS[0]),
            allowed_origins: DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
        }
    }
}
