use lettre::Address;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::OnceLock};

pub const MIN_NAME_CHARS: usize = 2;
pub const MIN_PHONE_CHARS: usize = 7;
pub const MAX_MESSAGE_CHARS: usize = 400;

const REQUIRED: &str = "Required";
const EXPECTED_STRING: &str = "Expected string";

/// `+27` or `0`, a network digit 6-8, then eight more digits. A single space is allowed after
/// `+27`, after the two-digit network code and after the next three digits.
const ZA_MOBILE_PATTERN: &str = r"^(?:\+27 ?|0)[6-8][0-9] ?[0-9]{3} ?[0-9]{4}$";

/// Which rule the `phone` field is checked against. Exactly one applies per deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhonePolicy {
    /// At least seven characters of anything.
    #[default]
    MinimumLength,
    /// A South African mobile number.
    SouthAfricanMobile,
}

impl FromStr for PhonePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min-length" => Ok(PhonePolicy::MinimumLength),
            "za-mobile" => Ok(PhonePolicy::SouthAfricanMobile),
            other => Err(format!(
                "unknown phone policy {other:?}, expected \"min-length\" or \"za-mobile\""
            )),
        }
    }
}

impl PhonePolicy {
    fn check(self, phone: &str) -> Option<String> {
        match self {
            PhonePolicy::MinimumLength => {
                (phone.chars().count() < MIN_PHONE_CHARS).then(|| too_short(MIN_PHONE_CHARS))
            }
            PhonePolicy::SouthAfricanMobile => (!za_mobile_regex().is_match(phone))
                .then(|| "Invalid South African mobile number".into()),
        }
    }
}

fn za_mobile_regex() -> &'static Regex {
    static ZA_MOBILE: OnceLock<Regex> = OnceLock::new();
    ZA_MOBILE.get_or_init(|| Regex::new(ZA_MOBILE_PATTERN).unwrap())
}

/// A validated, normalised quote request.
#[derive(Clone, Debug, PartialEq)]
pub struct QuoteRequest {
    pub name: String,
    pub company: String,
    pub email: Address,
    pub phone: String,
    pub service: String,
    pub message: Option<String>,
    pub attribution: Attribution,
    pub captcha_token: Option<String>,
}

/// Where the submission came from, as reported by the form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Attribution {
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub page: Option<String>,
    pub referral: Option<String>,
}

impl Attribution {
    /// Present attribution fields with their labels, in display order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("Source", &self.utm_source),
            ("Medium", &self.utm_medium),
            ("Campaign", &self.utm_campaign),
            ("Page", &self.page),
            ("Referral", &self.referral),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|value| (label, value)))
    }
}

/// Violations keyed by field name. Serialises as `{ "<field>": ["<message>", ...] }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<&'static str, Vec<String>>);

impl FieldErrors {
    fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

impl Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid fields: {}",
            self.fields().collect::<Vec<_>>().join(", ")
        )
    }
}

impl std::error::Error for FieldErrors {}

/// Checks an untyped form submission and produces a [`QuoteRequest`] or the complete set of
/// field violations. Fields other than the known ones are ignored.
pub fn validate(
    input: &Map<String, Value>,
    policy: PhonePolicy,
) -> Result<QuoteRequest, FieldErrors> {
    let mut reader = FieldReader {
        input,
        errors: FieldErrors::default(),
    };

    let name = reader.required_line("name").filter(|name| {
        reader.check("name", at_least(name, MIN_NAME_CHARS))
    });
    let company = reader.required_line("company").filter(|company| {
        reader.check("company", at_least(company, MIN_NAME_CHARS))
    });
    let email = reader.required("email").and_then(|email| match parse_email(&email) {
        Some(address) => Some(address),
        None => {
            reader.errors.add("email", "Invalid email address");
            None
        }
    });
    let phone = reader
        .required("phone")
        .filter(|phone| reader.check("phone", policy.check(phone)));
    let service = reader.required_line("service");
    let message = reader.optional("message").filter(|message| {
        reader.check(
            "message",
            (message.chars().count() > MAX_MESSAGE_CHARS)
                .then(|| format!("Must contain at most {MAX_MESSAGE_CHARS} characters")),
        )
    });
    let attribution = Attribution {
        utm_source: reader.optional("utm_source"),
        utm_medium: reader.optional("utm_medium"),
        utm_campaign: reader.optional("utm_campaign"),
        page: reader.optional("page"),
        referral: reader.optional("referral"),
    };
    let captcha_token = reader.optional("captchaToken");

    match (name, company, email, phone, service) {
        (Some(name), Some(company), Some(email), Some(phone), Some(service))
            if reader.errors.is_empty() =>
        {
            Ok(QuoteRequest {
                name,
                company,
                email,
                phone,
                service,
                message,
                attribution,
                captcha_token,
            })
        }
        _ => Err(reader.errors),
    }
}

struct FieldReader<'a> {
    input: &'a Map<String, Value>,
    errors: FieldErrors,
}

impl FieldReader<'_> {
    /// Reads a field which must be present and non-empty after trimming.
    fn required(&mut self, field: &'static str) -> Option<String> {
        match self.optional(field) {
            Some(value) => Some(value),
            None => {
                if !self.errors.contains(field) {
                    self.errors.add(field, REQUIRED);
                }
                None
            }
        }
    }

    /// Reads a required field which ends up in a mail header, so it must stay on one line.
    fn required_line(&mut self, field: &'static str) -> Option<String> {
        let value = single_line(&self.required(field)?);
        if value.is_empty() {
            self.errors.add(field, REQUIRED);
            return None;
        }
        Some(value)
    }

    /// Reads a field which may be absent. Absent, null and blank values all read as `None`.
    fn optional(&mut self, field: &'static str) -> Option<String> {
        match self.input.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            Some(_) => {
                self.errors.add(field, EXPECTED_STRING);
                None
            }
        }
    }

    /// Records `violation` against `field`; returns whether the field passed.
    fn check(&mut self, field: &'static str, violation: Option<String>) -> bool {
        match violation {
            Some(message) => {
                self.errors.add(field, message);
                false
            }
            None => true,
        }
    }
}

/// Collapses runs of whitespace, line breaks included, into single spaces and drops other
/// control characters.
fn single_line(value: &str) -> String {
    value
        .split(|c: char| c.is_whitespace())
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn at_least(value: &str, min: usize) -> Option<String> {
    (value.chars().count() < min).then(|| too_short(min))
}

fn too_short(min: usize) -> String {
    format!("Must contain at least {min} characters")
}

fn parse_email(email: &str) -> Option<Address> {
    let address: Address = email.parse().ok()?;
    let domain = address.domain();
    (domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')).then_some(address)
}

#[cfg(test)]
mod tests {
    use super::{validate, FieldErrors, PhonePolicy, QuoteRequest, MAX_MESSAGE_CHARS};
    use googletest::prelude::*;
    use serde_json::{json, Map, Value};

    const REQUIRED_FIELDS: [&str; 5] = ["name", "company", "email", "phone", "service"];

    fn well_formed() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "name": "Jane Doe",
            "company": "Acme CC",
            "email": "jane@acme.co.za",
            "phone": "0821234567",
            "service": "Plumbing",
            "message": "Need a quote",
        }) else {
            unreachable!()
        };
        map
    }

    fn with(field: &str, value: Value) -> Map<String, Value> {
        let mut input = well_formed();
        input.insert(field.into(), value);
        input
    }

    fn errors_for(input: Map<String, Value>, policy: PhonePolicy) -> FieldErrors {
        validate(&input, policy).expect_err("input should be rejected")
    }

    fn messages(errors: &FieldErrors, field: &str) -> Vec<String> {
        errors.get(field).map(<[String]>::to_vec).unwrap_or_default()
    }

    #[test]
    fn accepts_well_formed_request() -> Result<()> {
        let quote = validate(&well_formed(), PhonePolicy::MinimumLength);

        verify_that!(
            quote,
            ok(matches_pattern!(QuoteRequest {
                name: eq("Jane Doe"),
                company: eq("Acme CC"),
                phone: eq("0821234567"),
                service: eq("Plumbing"),
                message: some(eq("Need a quote")),
                captcha_token: none()
            }))
        )
    }

    #[test]
    fn reports_each_missing_required_field() -> Result<()> {
        for field in REQUIRED_FIELDS {
            let mut input = well_formed();
            input.remove(field);

            let errors = errors_for(input, PhonePolicy::MinimumLength);

            verify_that!(
                messages(&errors, field),
                elements_are![eq("Required")]
            )?;
            verify_that!(errors.fields().count(), eq(1))?;
        }
        Ok(())
    }

    #[test]
    fn treats_null_and_blank_required_fields_as_missing() -> Result<()> {
        let mut input = with("name", Value::Null);
        input.insert("service".into(), json!("   "));

        let errors = errors_for(input, PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "name"),
            elements_are![eq("Required")]
        )?;
        verify_that!(
            messages(&errors, "service"),
            elements_are![eq("Required")]
        )
    }

    #[test]
    fn reports_every_invalid_field_at_once() -> Result<()> {
        let errors = errors_for(Map::new(), PhonePolicy::MinimumLength);

        verify_that!(
            errors.fields().collect::<Vec<_>>(),
            elements_are![eq("company"), eq("email"), eq("name"), eq("phone"), eq("service")]
        )
    }

    #[test]
    fn rejects_non_string_values() -> Result<()> {
        let errors = errors_for(with("phone", json!(821234567)), PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "phone"),
            elements_are![eq("Expected string")]
        )
    }

    #[test]
    fn rejects_non_string_optional_values() -> Result<()> {
        let errors = errors_for(with("utm_source", json!(["ads"])), PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "utm_source"),
            elements_are![eq("Expected string")]
        )
    }

    #[test]
    fn rejects_single_character_name_and_company() -> Result<()> {
        let mut input = with("name", json!("J"));
        input.insert("company".into(), json!("A"));

        let errors = errors_for(input, PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "name"),
            elements_are![eq("Must contain at least 2 characters")]
        )?;
        verify_that!(errors.contains("company"), eq(true))
    }

    #[test]
    fn counts_characters_rather_than_bytes() -> Result<()> {
        let quote = validate(&with("name", json!("Zoë")), PhonePolicy::MinimumLength);

        verify_that!(quote, ok(anything()))?;
        verify_that!(
            validate(&with("name", json!("é")), PhonePolicy::MinimumLength),
            err(anything())
        )
    }

    #[test]
    fn rejects_malformed_email() -> Result<()> {
        for email in ["jane", "jane@", "@acme.co.za", "jane@acme", "jane doe@acme.co.za"] {
            let errors = errors_for(with("email", json!(email)), PhonePolicy::MinimumLength);

            verify_that!(
                messages(&errors, "email"),
                elements_are![eq("Invalid email address")]
            )?;
        }
        Ok(())
    }

    #[test]
    fn minimum_length_policy_rejects_short_phone() -> Result<()> {
        let errors = errors_for(with("phone", json!("082123")), PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "phone"),
            elements_are![eq("Must contain at least 7 characters")]
        )
    }

    #[test]
    fn minimum_length_policy_accepts_international_numbers() -> Result<()> {
        verify_that!(
            validate(&with("phone", json!("+44 20 7946 0958")), PhonePolicy::MinimumLength),
            ok(anything())
        )
    }

    #[test]
    fn south_african_policy_accepts_conventional_formats() -> Result<()> {
        for phone in [
            "0821234567",
            "082 123 4567",
            "+27821234567",
            "+27 82 123 4567",
            "0612345678",
            "0791234567",
        ] {
            verify_that!(
                validate(&with("phone", json!(phone)), PhonePolicy::SouthAfricanMobile),
                ok(anything())
            )?;
        }
        Ok(())
    }

    #[test]
    fn south_african_policy_rejects_other_numbers() -> Result<()> {
        for phone in [
            "0521234567",
            "08212345678",
            "082123456",
            "082  123 4567",
            "27821234567",
            "+44 20 7946 0958",
        ] {
            let errors = errors_for(with("phone", json!(phone)), PhonePolicy::SouthAfricanMobile);

            verify_that!(
                messages(&errors, "phone"),
                elements_are![eq("Invalid South African mobile number")]
            )?;
        }
        Ok(())
    }

    #[test]
    fn accepts_message_of_maximum_length() -> Result<()> {
        let message = "x".repeat(MAX_MESSAGE_CHARS);

        verify_that!(
            validate(&with("message", json!(message)), PhonePolicy::MinimumLength),
            ok(field!(QuoteRequest.message, some(anything())))
        )
    }

    #[test]
    fn rejects_message_over_maximum_length() -> Result<()> {
        let message = "x".repeat(MAX_MESSAGE_CHARS + 1);

        let errors = errors_for(with("message", json!(message)), PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "message"),
            elements_are![eq("Must contain at most 400 characters")]
        )
    }

    #[test]
    fn measures_message_length_after_trimming() -> Result<()> {
        let message = format!("{}   \n", "x".repeat(MAX_MESSAGE_CHARS));

        verify_that!(
            validate(&with("message", json!(message)), PhonePolicy::MinimumLength),
            ok(field!(
                QuoteRequest.message,
                some(eq("x".repeat(MAX_MESSAGE_CHARS)))
            ))
        )
    }

    #[test]
    fn measures_name_length_after_trimming() -> Result<()> {
        let errors = errors_for(with("name", json!("J ")), PhonePolicy::MinimumLength);

        verify_that!(
            messages(&errors, "name"),
            elements_are![eq("Must contain at least 2 characters")]
        )
    }

    #[test]
    fn message_is_optional() -> Result<()> {
        let mut input = well_formed();
        input.remove("message");

        verify_that!(
            validate(&input, PhonePolicy::MinimumLength),
            ok(field!(QuoteRequest.message, none()))
        )
    }

    #[test]
    fn ignores_unknown_fields() -> Result<()> {
        let input = with("favourite_colour", json!({ "nested": true }));

        verify_that!(validate(&input, PhonePolicy::MinimumLength), ok(anything()))
    }

    #[googletest::test]
    fn keeps_header_fields_on_one_line() {
        let mut input = with("name", json!("Jane\r\nDoe"));
        input.insert("company".into(), json!("Acme\u{0}\tCC"));
        input.insert("service".into(), json!("Plumbing\n\nand drainage"));

        let quote = validate(&input, PhonePolicy::MinimumLength).unwrap();

        expect_that!(quote.name, eq("Jane Doe"));
        expect_that!(quote.company, eq("Acme CC"));
        expect_that!(quote.service, eq("Plumbing and drainage"));
    }

    #[test]
    fn keeps_line_breaks_in_message() -> Result<()> {
        let input = with("message", json!("First line\nSecond line"));

        verify_that!(
            validate(&input, PhonePolicy::MinimumLength),
            ok(field!(QuoteRequest.message, some(eq("First line\nSecond line"))))
        )
    }

    #[test]
    fn trims_surrounding_whitespace() -> Result<()> {
        let input = with("name", json!("  Jane Doe\n"));

        verify_that!(
            validate(&input, PhonePolicy::MinimumLength),
            ok(field!(QuoteRequest.name, eq("Jane Doe")))
        )
    }

    #[test]
    fn reads_attribution_and_captcha_token() -> Result<()> {
        let mut input = with("utm_source", json!("newsletter"));
        input.insert("page".into(), json!("/services/plumbing"));
        input.insert("captchaToken".into(), json!("token"));

        let quote = validate(&input, PhonePolicy::MinimumLength).unwrap();

        verify_that!(
            quote.attribution.entries().collect::<Vec<_>>(),
            elements_are![
                eq(("Source", "newsletter")),
                eq(("Page", "/services/plumbing"))
            ]
        )?;
        verify_that!(quote.captcha_token, some(eq("token")))
    }

    #[test]
    fn validation_is_repeatable() -> Result<()> {
        let input = well_formed();

        let first = validate(&input, PhonePolicy::MinimumLength);
        let second = validate(&input, PhonePolicy::MinimumLength);

        verify_that!(first, eq(second))
    }

    #[test]
    fn serialises_errors_as_field_map() -> Result<()> {
        let errors = errors_for(with("name", json!("J")), PhonePolicy::MinimumLength);

        verify_that!(
            serde_json::to_value(&errors).unwrap(),
            eq(json!({ "name": ["Must contain at least 2 characters"] }))
        )
    }

    #[test]
    fn parses_phone_policy_names() -> Result<()> {
        verify_that!("min-length".parse::<PhonePolicy>(), ok(eq(PhonePolicy::MinimumLength)))?;
        verify_that!("za-mobile".parse::<PhonePolicy>(), ok(eq(PhonePolicy::SouthAfricanMobile)))?;
        verify_that!("strict".parse::<PhonePolicy>(), err(anything()))
    }
}
