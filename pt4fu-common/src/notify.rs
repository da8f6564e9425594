//! User notification abstraction.
//!
//! The update engine never talks to a desktop notification bus directly —
//! it emits one of five [`UpdateStatus`] kinds through a [`NotificationSink`]
//! and interprets the reply. [`message_for`] is the pure dispatch table
//! (message text, icon, and offered actions per status/device pair) this
//! module carries over from the original notification manager's
//! `MESSAGE_DATA` table and message templates.

use crate::device_id::DeviceName;

/// One of the five events the updater can notify the user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Prompt,
    Ongoing,
    Success,
    SuccessRequiresRestart,
    Failure,
}

impl UpdateStatus {
    /// Whether this status is terminal — once emitted, the notification id
    /// for this device is retired rather than reused.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateStatus::Success | UpdateStatus::SuccessRequiresRestart | UpdateStatus::Failure
        )
    }
}

/// One action button offered alongside a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub text: &'static str,
    pub command: ActionCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCommand {
    /// Reboot the hub specifically (shuts down after arming a
    /// reboot-on-shutdown breadcrumb).
    HubReboot,
    /// A plain reboot.
    Reboot,
    /// Acknowledge the prompt and let the caller proceed with the update.
    UpdateNow,
}

/// Icon name, message text, and actions for one (status, device) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub icon: &'static str,
    pub message: String,
    pub actions: Vec<Action>,
}

/// Build the notification content for `status` targeting `device_name`.
/// Pure function: the exact table the original notification manager keyed
/// by `UpdateStatusEnum`, translated to an enum match.
pub fn message_for(status: UpdateStatus, device_name: DeviceName) -> Notification {
    let friendly = device_name.friendly_name();

    let (icon, message) = match status {
        UpdateStatus::Success => (
            "vcs-normal",
            format!("Your {friendly} has been updated and is ready to use."),
        ),
        UpdateStatus::SuccessRequiresRestart => {
            if device_name == DeviceName::Pt4Hub {
                ("vcs-normal", format!("Reboot your {friendly} to apply changes."))
            } else {
                (
                    "vcs-normal",
                    format!("Disconnect and reconnect your\n{friendly} to apply changes."),
                )
            }
        }
        UpdateStatus::Prompt => (
            "messagebox_info",
            format!("There's a firmware update available\nfor your {friendly}."),
        ),
        UpdateStatus::Failure => (
            "messagebox_critical",
            format!(
                "A problem was encountered while attempting\n\
                 to update your {friendly}.\n\
                 Please reboot and try again.\n\
                 If you are repeatedly experiencing\n\
                 this issue, please contact pi-top support."
            ),
        ),
        UpdateStatus::Ongoing => (
            "messagebox_info",
            format!(
                "Updating your {friendly}.\nPlease wait for this to finish before\ncontinuing to use your device!"
            ),
        ),
    };

    let actions = match status {
        UpdateStatus::Prompt => vec![Action {
            text: "Update Now",
            command: ActionCommand::UpdateNow,
        }],
        UpdateStatus::SuccessRequiresRestart if device_name == DeviceName::Pt4Hub => {
            vec![Action {
                text: "Reboot Now",
                command: ActionCommand::HubReboot,
            }]
        }
        UpdateStatus::Failure => vec![Action {
            text: "Reboot Now",
            command: ActionCommand::Reboot,
        }],
        _ => vec![],
    };

    Notification {
        icon,
        message,
        actions,
    }
}

/// Abstract sink the updater emits notifications through. A real
/// implementation speaks to the desktop notification bus; tests substitute
/// a fake that just records what was sent.
pub trait NotificationSink {
    /// Emit a notification, reusing `notification_id` to update an
    /// existing one if present. Returns the tokenised reply: the first
    /// whitespace-delimited token is a notification id to remember for
    /// future reuse (absent for terminal kinds), the rest describe which
    /// action (if any) the user invoked. An "OK" token anywhere in the
    /// reply is the signal a PROMPT was accepted.
    fn notify(
        &mut self,
        device_name: DeviceName,
        status: UpdateStatus,
        notification_id: Option<&str>,
    ) -> Option<String>;
}

/// Tracks the one outstanding notification id per device and interprets a
/// PROMPT reply.
#[derive(Default)]
pub struct Notifier<S> {
    sink: S,
    notification_ids: std::collections::HashMap<DeviceName, String>,
}

impl<S: NotificationSink> Notifier<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            notification_ids: std::collections::HashMap::new(),
        }
    }

    /// Emit `status` for `device_name`, updating this device's remembered
    /// notification id from the reply (or clearing it, for a terminal
    /// status).
    pub fn emit(&mut self, device_name: DeviceName, status: UpdateStatus) -> Option<String> {
        let existing_id = self.notification_ids.get(&device_name).cloned();
        let reply = self.sink.notify(device_name, status, existing_id.as_deref());

        if status.is_terminal() {
            self.notification_ids.remove(&device_name);
        } else if let Some(reply) = &reply {
            if let Some(id) = reply.split_whitespace().next() {
                self.notification_ids.insert(device_name, id.to_string());
            }
        }

        reply
    }

    /// Emit a PROMPT and report whether the user accepted it. Anything
    /// other than an "OK" token (including no reply at all) is a decline.
    pub fn prompt_accepted(&mut self, device_name: DeviceName) -> bool {
        match self.emit(device_name, UpdateStatus::Prompt) {
            Some(reply) => reply.split_whitespace().any(|token| token == "OK"),
            None => false,
        }
    }
}
