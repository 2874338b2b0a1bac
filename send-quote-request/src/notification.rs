use crate::quote::QuoteRequest;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

const NOTIFICATION_TEMPLATE_NAME: &str = "quote-notification";
const NOTIFICATION_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/quote-notification.html"
));

// South Africa Standard Time has no daylight saving.
const SAST_OFFSET_SECONDS: i64 = 2 * 60 * 60;
const TIMESTAMP_FORMAT: &str = "%Y/%m/%d, %H:%M:%S";

/// The email sent to the business for one quote request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub html: String,
}

#[derive(Serialize)]
struct Context<'a> {
    name: &'a str,
    company: &'a str,
    email: String,
    phone: &'a str,
    service: &'a str,
    message: Option<&'a str>,
    attribution: Vec<AttributionLine<'a>>,
    received_at: String,
}

#[derive(Serialize)]
struct AttributionLine<'a> {
    label: &'static str,
    value: &'a str,
}

pub fn render_notification(
    quote: &QuoteRequest,
    received_at: DateTime<Utc>,
) -> Result<Notification, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("line_breaks", line_breaks);
    tt.add_template(NOTIFICATION_TEMPLATE_NAME, NOTIFICATION_TEMPLATE)?;
    let context = Context {
        name: &quote.name,
        company: &quote.company,
        email: quote.email.to_string(),
        phone: &quote.phone,
        service: &quote.service,
        message: quote.message.as_deref(),
        attribution: quote
            .attribution
            .entries()
            .map(|(label, value)| AttributionLine { label, value })
            .collect(),
        received_at: format_received_at(received_at),
    };
    Ok(Notification {
        subject: format!("Quote Request: {} – {}", quote.service, quote.company),
        html: tt.render(NOTIFICATION_TEMPLATE_NAME, &context)?,
    })
}

/// Formats the way an `en-ZA` browser shows a Johannesburg timestamp.
fn format_received_at(received_at: DateTime<Utc>) -> String {
    (received_at.naive_utc() + Duration::seconds(SAST_OFFSET_SECONDS))
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

fn line_breaks(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\r\n", "\n").replace('\n', "<br/>"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{render_notification, Notification};
    use crate::quote::{Attribution, QuoteRequest};
    use chrono::{DateTime, TimeZone, Utc};
    use googletest::prelude::*;

    const MALICIOUS_CONTENT: &str = "<script>doEvil();</script>";

    fn quote() -> QuoteRequest {
        QuoteRequest {
            name: "Jane Doe".into(),
            company: "Acme CC".into(),
            email: "jane@acme.co.za".parse().unwrap(),
            phone: "0821234567".into(),
            service: "Plumbing".into(),
            message: Some("Need a quote".into()),
            attribution: Attribution::default(),
            captcha_token: None,
        }
    }

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 22, 30, 15).unwrap()
    }

    fn render(quote: &QuoteRequest) -> Notification {
        render_notification(quote, received_at()).unwrap()
    }

    #[test]
    fn subject_names_service_and_company() -> Result<()> {
        let notification = render(&quote());

        verify_that!(
            notification.subject,
            eq("Quote Request: Plumbing – Acme CC")
        )
    }

    #[test]
    fn lists_every_field_once_in_order() -> Result<()> {
        let html = render(&quote()).html;
        let values = [
            "Jane Doe",
            "Acme CC",
            "jane@acme.co.za",
            "0821234567",
            "Plumbing",
            "Need a quote",
        ];

        for value in values {
            verify_that!(html.matches(value).count(), eq(1))?;
        }
        let positions = values
            .iter()
            .map(|value| html.find(value).unwrap())
            .collect::<Vec<_>>();
        verify_that!(positions.windows(2).all(|pair| pair[0] < pair[1]), eq(true))
    }

    #[test]
    fn omits_message_when_absent() -> Result<()> {
        let html = render(&QuoteRequest {
            message: None,
            ..quote()
        })
        .html;

        verify_that!(html, not(contains_substring("Message:")))
    }

    #[test]
    fn converts_newlines_in_message_to_line_breaks() -> Result<()> {
        let html = render(&QuoteRequest {
            message: Some("First line\nSecond line\r\nThird line".into()),
            ..quote()
        })
        .html;

        verify_that!(
            html,
            contains_substring("First line<br/>Second line<br/>Third line")
        )
    }

    #[test]
    fn escapes_user_input_in_fields() -> Result<()> {
        let html = render(&QuoteRequest {
            name: MALICIOUS_CONTENT.into(),
            ..quote()
        })
        .html;

        verify_that!(html, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[test]
    fn escapes_user_input_in_message() -> Result<()> {
        let html = render(&QuoteRequest {
            message: Some(MALICIOUS_CONTENT.into()),
            ..quote()
        })
        .html;

        verify_that!(html, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[test]
    fn renders_timestamp_in_south_african_time() -> Result<()> {
        let html = render(&quote()).html;

        verify_that!(html, contains_substring("Received at 2024/03/06, 00:30:15"))
    }

    #[test]
    fn lists_attribution_when_present() -> Result<()> {
        let html = render(&QuoteRequest {
            attribution: Attribution {
                utm_campaign: Some("winter-special".into()),
                referral: Some("Bob".into()),
                ..Attribution::default()
            },
            ..quote()
        })
        .html;

        verify_that!(
            html,
            all!(
                contains_substring("<strong>Campaign:</strong> winter-special"),
                contains_substring("<strong>Referral:</strong> Bob"),
                not(contains_substring("Source:"))
            )
        )
    }

    #[test]
    fn omits_attribution_section_when_empty() -> Result<()> {
        let html = render(&quote()).html;

        verify_that!(html, not(contains_substring("Attribution")))
    }
}
