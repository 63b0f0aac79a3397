use postq_common::{QueuedMessage, RecipientKind};
use postq_smtp::{Mailbox, OutgoingMessage};

/// Build the outgoing message for a queued record.
///
/// To and Cc recipients become primary recipients; Bcc recipients only go in
/// the envelope. Empty reply-to and return-path values are ignored.
pub fn assemble(record: &QueuedMessage) -> OutgoingMessage {
    let params = &record.parameters;
    let mut message = OutgoingMessage::new(Mailbox::new(
        params.from_email.clone(),
        params.from_name.clone(),
    ));

    for recipient in &record.recipients {
        match recipient.kind {
            RecipientKind::Bcc => message.add_bcc(recipient.email.clone(), recipient.name.clone()),
            RecipientKind::To | RecipientKind::Cc => {
                message.add_to(recipient.email.clone(), recipient.name.clone());
            }
        }
    }

    message.subject.clone_from(&params.subject);
    message.body.clone_from(&record.body);
    message.is_plain = params.is_plain;
    message.reply_to = non_empty(params.reply_to.as_deref());
    message.return_path = non_empty(params.return_to.as_deref());

    message
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
