use std::fmt::Write as _;

use askama::Template;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::security::{run_command_allowlisted, ALLOWED_TOOLS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub recipient: String,
    pub subject: String,
    pub html_body: String,
    pub attachment: Option<Attachment>,
}

/// Which notification a report email carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportNotice {
    Fresh { generated_at: DateTime<Utc> },
    Reused,
}

#[derive(Template)]
#[template(path = "email_fresh.html")]
struct FreshReportEmail<'a> {
    domain: &'a str,
    generated_at: String,
}

#[derive(Template)]
#[template(path = "email_reused.html")]
struct ReusedReportEmail<'a> {
    domain: &'a str,
}

pub fn report_subject(domain: &str) -> String {
    format!("Security report: {domain}")
}

pub fn compose_report_email(
    notice: ReportNotice,
    domain: &str,
    recipient: &str,
    pdf: Vec<u8>,
    filename: &str,
) -> anyhow::Result<OutgoingEmail> {
    let html_body = match notice {
        ReportNotice::Fresh { generated_at } => FreshReportEmail {
            domain,
            generated_at: generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        }
        .render()?,
        ReportNotice::Reused => ReusedReportEmail { domain }.render()?,
    };

    Ok(OutgoingEmail {
        recipient: recipient.to_string(),
        subject: report_subject(domain),
        html_body,
        attachment: Some(Attachment {
            filename: filename.to_string(),
            content_type: "application/pdf".to_string(),
            bytes: pdf,
        }),
    })
}

/// Mail delivery. `Err` means the message was not accepted.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Hands messages to the local MTA through `sendmail -t -i`.
pub struct SendmailMailer {
    binary: String,
    from_address: String,
    from_name: String,
}

impl SendmailMailer {
    pub fn new(
        binary: impl Into<String>,
        from_address: impl Into<String>,
        from_name: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            from_address: from_address.into(),
            from_name: from_name.into(),
        }
    }

    fn mailbox(&self) -> String {
        format!("{} <{}>", encode_header(&self.from_name), self.from_address)
    }
}

#[async_trait::async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        let boundary = format!("pb-{}", uuid::Uuid::new_v4().simple());
        let message = build_mime_message(&self.mailbox(), email, &boundary)?;
        run_command_allowlisted(
            &self.binary,
            &["-t".to_string(), "-i".to_string()],
            ALLOWED_TOOLS,
            Some(message.into_bytes()),
            None,
        )
        .await?;
        info!(
            recipient = %email.recipient,
            attachment = email.attachment.as_ref().map(|a| a.filename.as_str()),
            "email handed to MTA"
        );
        Ok(())
    }
}

fn ensure_single_line(field: &str, value: &str) -> anyhow::Result<()> {
    if value.contains(['\r', '\n']) {
        anyhow::bail!("{field} must not contain line breaks");
    }
    Ok(())
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

fn push_base64_lines(out: &mut String, bytes: &[u8]) {
    let encoded = STANDARD.encode(bytes);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII, so every chunk is valid UTF-8.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
}

pub fn build_mime_message(
    from: &str,
    email: &OutgoingEmail,
    boundary: &str,
) -> anyhow::Result<String> {
    ensure_single_line("recipient", &email.recipient)?;
    ensure_single_line("subject", &email.subject)?;
    ensure_single_line("sender", from)?;

    let mut out = String::new();
    write!(out, "From: {from}\r\n")?;
    write!(out, "To: {}\r\n", email.recipient)?;
    write!(out, "Subject: {}\r\n", encode_header(&email.subject))?;
    write!(out, "Date: {}\r\n", Utc::now().to_rfc2822())?;
    out.push_str("MIME-Version: 1.0\r\n");
    write!(
        out,
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    )?;

    write!(out, "--{boundary}\r\n")?;
    out.push_str("Content-Type: text/html; charset=utf-8\r\n");
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    push_base64_lines(&mut out, email.html_body.as_bytes());

    if let Some(attachment) = &email.attachment {
        ensure_single_line("filename", &attachment.filename)?;
        let filename = attachment.filename.replace('"', "");
        write!(out, "--{boundary}\r\n")?;
        write!(
            out,
            "Content-Type: {}; name=\"{filename}\"\r\n",
            attachment.content_type
        )?;
        write!(
            out,
            "Content-Disposition: attachment; filename=\"{filename}\"\r\n"
        )?;
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        push_base64_lines(&mut out, &attachment.bytes);
    }

    write!(out, "--{boundary}--\r\n")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fresh_email() -> OutgoingEmail {
        compose_report_email(
            ReportNotice::Fresh {
                generated_at: Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap(),
            },
            "example.com",
            "admin@example.com",
            b"%PDF-1.4 fake".to_vec(),
            "report_example.com_20240610120000.pdf",
        )
        .unwrap()
    }

    #[test]
    fn fresh_notice_mentions_generation_time() {
        let email = fresh_email();
        assert_eq!(email.subject, "Security report: example.com");
        assert!(email.html_body.contains("2024-06-10 12:00 UTC"));
        assert_eq!(
            email.attachment.as_ref().unwrap().content_type,
            "application/pdf"
        );
    }

    #[test]
    fn reused_notice_mentions_only_the_domain() {
        let email = compose_report_email(
            ReportNotice::Reused,
            "stale.com",
            "admin@stale.com",
            b"%PDF".to_vec(),
            "report_stale.com_20240610100000.pdf",
        )
        .unwrap();
        assert!(email.html_body.contains("stale.com"));
        assert!(!email.html_body.contains("UTC"));
    }

    #[test]
    fn mime_message_carries_headers_and_base64_attachment() {
        let email = fresh_email();
        let message = build_mime_message("PortBrief <noreply@portbrief.local>", &email, "b0")
            .unwrap();

        assert!(message.starts_with("From: PortBrief <noreply@portbrief.local>\r\n"));
        assert!(message.contains("To: admin@example.com\r\n"));
        assert!(message.contains("Subject: Security report: example.com\r\n"));
        assert!(message.contains("multipart/mixed; boundary=\"b0\""));
        assert!(message.contains(
            "Content-Disposition: attachment; filename=\"report_example.com_20240610120000.pdf\""
        ));
        assert!(message.contains(&STANDARD.encode(b"%PDF-1.4 fake")));
        assert!(message.ends_with("--b0--\r\n"));
        assert!(message.lines().all(|l| l.len() <= 998));
    }

    #[test]
    fn header_injection_is_rejected() {
        let mut email = fresh_email();
        email.recipient = "victim@example.com\r\nBcc: everyone@example.com".into();
        assert!(build_mime_message("a <a@b.c>", &email, "b0").is_err());
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        assert_eq!(encode_header("plain"), "plain");
        assert!(encode_header("Informe de seguridad: año").starts_with("=?utf-8?B?"));
    }

    #[tokio::test]
    async fn sendmail_outside_allowlist_fails() {
        let mailer = SendmailMailer::new("/usr/bin/curl", "noreply@portbrief.local", "PortBrief");
        assert!(mailer.send(&fresh_email()).await.is_err());
    }
}
