use std::{
    fs,
    sync::Mutex,
};
use async_trait::async_trait;

use fanout::mail::{
    self, Email, Envelope, MailError, MailTransport, Recipient, SendReceipt,
};

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Email>>,
    reject_with: Option<u16>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &Email) -> Result<SendReceipt, MailError> {
        self.sent.lock().unwrap().push(email.clone());
        if let Some(status) = self.reject_with {
            return Err(MailError::HttpStatus { status, body: "rejected".into() });
        }
        Ok(SendReceipt {
            status: 202,
            message_id: Some("msg-1".into()),
        })
    }
}

fn envelope() -> Envelope {
    let from = Recipient {
        name: "Ops".into(),
        email: "ops@example.test".into(),
    };
    Envelope {
        reply_to: from.clone(),
        from,
        subject: "This is a Test Email".into(),
    }
}

#[tokio::test]
async fn sends_one_mail_to_all_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = dir.path().join("emails.json");
    fs::write(
        &recipients,
        r#"[{"name": "Ann", "email": "ann@example.test"}, {"name": "Bo", "email": "bo@example.test"}]"#,
    )
    .unwrap();
    let transport = RecordingTransport::default();

    let receipt = mail::send_to_recipients(
        &transport,
        &envelope(),
        &recipients,
        Some("This is a test email message."),
    )
    .await
    .unwrap();

    assert_eq!(receipt, Some(SendReceipt { status: 202, message_id: Some("msg-1".into()) }));
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to.len(), 2);
    assert_eq!(sent[0].to[1].email, "bo@example.test");
    assert_eq!(sent[0].html, "<p>This is a test email message.</p>");
}

#[tokio::test]
async fn empty_recipient_list_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = dir.path().join("emails.json");
    fs::write(&recipients, "[]").unwrap();
    let transport = RecordingTransport::default();

    let receipt = mail::send_to_recipients(&transport, &envelope(), &recipients, Some("hi"))
        .await
        .unwrap();

    assert_eq!(receipt, None);
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_recipients_file_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let transport = RecordingTransport::default();

    let receipt = mail::send_to_recipients(
        &transport,
        &envelope(),
        dir.path().join("missing.json"),
        Some("hi"),
    )
    .await
    .unwrap();

    assert_eq!(receipt, None);
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_message_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = dir.path().join("emails.json");
    fs::write(&recipients, r#"[{"email": "ann@example.test"}]"#).unwrap();
    let transport = RecordingTransport::default();

    let receipt = mail::send_to_recipients(&transport, &envelope(), &recipients, None)
        .await
        .unwrap();

    assert_eq!(receipt, None);
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn provider_rejection_is_returned_once() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = dir.path().join("emails.json");
    fs::write(&recipients, r#"[{"email": "ann@example.test"}]"#).unwrap();
    let transport = RecordingTransport {
        reject_with: Some(422),
        ..RecordingTransport::default()
    };

    let err = mail::send_to_recipients(&transport, &envelope(), &recipients, Some("hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, MailError::HttpStatus { status: 422, .. }));
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[test]
fn malformed_recipients_file_counts_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let recipients = dir.path().join("emails.json");
    fs::write(&recipients, r#"{"email": "not-a-list"}"#).unwrap();
    assert!(mail::load_recipients(&recipients).is_empty());
}

#[test]
fn nothing_pending_without_message_or_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.json");
    fs::write(&empty, "[]").unwrap();
    let listed = dir.path().join("emails.json");
    fs::write(&listed, r#"[{"email": "ann@example.test"}]"#).unwrap();

    assert_eq!(mail::pending_recipients(&empty, Some("hi")), None);
    assert_eq!(mail::pending_recipients(dir.path().join("missing.json"), Some("hi")), None);
    assert_eq!(mail::pending_recipients(&listed, None), None);
    assert_eq!(
        mail::pending_recipients(&listed, Some("hi")).unwrap()[0].email,
        "ann@example.test"
    );
}
