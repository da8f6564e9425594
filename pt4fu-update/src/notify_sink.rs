//! Desktop notification sink backed by `notify-send`.
//!
//! The update flow shells out to a notification helper and parses its
//! stdout as a reply token: a PROMPT is sent with `--wait` and one action
//! per offered [`pt4fu_common::notify::Action`], keyed `"OK"` for the
//! accept action so it lines up with the token
//! [`pt4fu_common::notify::Notifier::prompt_accepted`] looks for;
//! `notify-send` prints the chosen action key to stdout on exit, or
//! nothing if the notification was dismissed unanswered.
use std::process::Command;

use pt4fu_common::device_id::DeviceName;
use pt4fu_common::notify::{message_for, ActionCommand, NotificationSink, UpdateStatus};

const NOTIFICATION_TITLE: &str = "Firmware Device Update";

pub struct DesktopNotificationSink;

fn action_key(command: ActionCommand) -> &'static str {
    match command {
        ActionCommand::UpdateNow => "OK",
        ActionCommand::HubReboot => "hub-reboot",
        ActionCommand::Reboot => "reboot",
    }
}

impl NotificationSink for DesktopNotificationSink {
    fn notify(
        &mut self,
        device_name: DeviceName,
        status: UpdateStatus,
        notification_id: Option<&str>,
    ) -> Option<String> {
        let notification = message_for(status, device_name);

        let mut command = Command::new("notify-send");
        command.arg("--icon").arg(notification.icon);
        if let Some(id) = notification_id {
            command.arg("--replace-id").arg(id);
        }
        if !notification.actions.is_empty() {
            command.arg("--wait");
            for action in &notification.actions {
                command.arg("--action").arg(format!(
                    "{}={}",
                    action_key(action.command),
                    action.text
                ));
            }
        }
        command.arg(NOTIFICATION_TITLE).arg(&notification.message);

        match command.output() {
            Ok(output) if output.status.success() => {
                let reply = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if reply.is_empty() {
                    None
                } else {
                    Some(reply)
                }
            }
            Ok(output) => {
                tracing::warn!(
                    %device_name,
                    status = ?status,
                    "notify-send exited with failure: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
                None
            }
            Err(e) => {
                tracing::warn!(%device_name, "failed to invoke notify-send: {e}");
                None
            }
        }
    }
}
