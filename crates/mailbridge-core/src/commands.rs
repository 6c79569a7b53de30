//! Slash commands.
//!
//! `/<trigger> <verb> [args]` is routed to the handshake, subscription and
//! import components. Every outcome, errors included, is rendered as an
//! ephemeral bot post to the invoking user in the invoking channel.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use mailbridge_channels::types::{ActionRequest, ActionResponse};
use mailbridge_channels::{ActionButton, Attachment, MessagePoster, Post};
use mailbridge_types::config::BridgeConfig;
use mailbridge_types::label::join_labels;
use mailbridge_types::{BridgeError, Label};

use crate::connector::MailboxConnector;
use crate::handshake::Handshake;
use crate::import::Importer;
use crate::subscriptions::SubscriptionManager;

/// Interactive-button actions on the disconnect confirmation.
pub const ACTION_DISCONNECT: &str = "disconnect";
pub const ACTION_CANCEL: &str = "cancel";

const SITE_URL_MISSING: &str = "Error! Site URL is not defined in the App";
const NO_SUBSCRIPTIONS: &str = "Currently, you have no active subscriptions.";

/// Who ran a command and where.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    /// Full command text, trigger included (`/gmail subscribe INBOX`).
    pub command: String,
    pub user_id: String,
    pub channel_id: String,
}

pub struct CommandDispatcher {
    config: Arc<BridgeConfig>,
    handshake: Arc<Handshake>,
    subscriptions: Arc<SubscriptionManager>,
    importer: Arc<Importer>,
    connector: Arc<dyn MailboxConnector>,
    poster: Arc<dyn MessagePoster>,
}

impl CommandDispatcher {
    pub fn new(
        config: Arc<BridgeConfig>,
        handshake: Arc<Handshake>,
        subscriptions: Arc<SubscriptionManager>,
        importer: Arc<Importer>,
        connector: Arc<dyn MailboxConnector>,
        poster: Arc<dyn MessagePoster>,
    ) -> Self {
        Self {
            config,
            handshake,
            subscriptions,
            importer,
            connector,
            poster,
        }
    }

    /// Run a command and post its reply.
    ///
    /// Returns the reply that was shown, or `None` when the command is not
    /// addressed to this bridge.
    pub async fn execute(&self, args: &CommandArgs) -> Result<Option<Post>, BridgeError> {
        let mut fields = args.command.split_whitespace();
        let trigger = format!("/{}", self.config.command_trigger);
        if fields.next() != Some(trigger.as_str()) {
            return Ok(None);
        }
        let verb = fields.next().unwrap_or("");
        let rest: Vec<&str> = fields.collect();

        info!(user_id = %args.user_id, verb = %verb, "executing command");

        let reply = match verb {
            "" | "help" => self.text(args, self.help_text()),
            "connect" => self.connect(args),
            "disconnect" => self.disconnect(args).await,
            "import" => self.text(args, self.import(args, &rest).await),
            "subscribe" => self.text(args, self.subscribe(args, &rest.join(" ")).await),
            "unsubscribe" => self.text(args, self.unsubscribe(args, &rest.join(" ")).await),
            "subscriptions" => self.text(args, self.list(args).await),
            other => self.text(
                args,
                format!("##### Unknown Command: {other}\n{}", self.help_text()),
            ),
        };

        self.poster.send_ephemeral(&args.user_id, &reply).await?;
        Ok(Some(reply))
    }

    /// Handle a click on the disconnect confirmation buttons.
    ///
    /// `authenticated_user` comes from the trusted request header; the body's
    /// user id must agree with it when present.
    pub async fn handle_disconnect_action(
        &self,
        authenticated_user: &str,
        request: &ActionRequest,
    ) -> Result<ActionResponse, BridgeError> {
        if authenticated_user.is_empty() {
            return Err(BridgeError::Unauthorized);
        }
        if !request.user_id.is_empty() && request.user_id != authenticated_user {
            warn!(user_id = %authenticated_user, "disconnect action for another user");
            return Err(BridgeError::Unauthorized);
        }
        let secret = request.context_str("action_secret").unwrap_or("");
        if !self.config.encryption_key.matches(secret) {
            warn!(user_id = %authenticated_user, "disconnect action with bad secret");
            return Err(BridgeError::Unauthorized);
        }

        match request.context_str("action") {
            Some(ACTION_DISCONNECT) => match self.handshake.disconnect(authenticated_user).await {
                Ok(()) => Ok(ActionResponse::update_message(format!(
                    ":zzz: You have successfully disconnected your Gmail account. \
                     You may also revoke access from your Google Account under Security > Third-party access.\n\
                     If you ever want to connect again, just use `/{} connect`.",
                    self.config.command_trigger
                ))),
                Err(e) => {
                    error!(user_id = %authenticated_user, error = %e, "disconnect failed");
                    let notice = Post::new(
                        self.poster.bot_user_id(),
                        request.channel_id.as_str(),
                        "Unable to disconnect Gmail. Please try again later.",
                    );
                    if let Err(post_err) = self.poster.send_ephemeral(authenticated_user, &notice).await {
                        warn!(user_id = %authenticated_user, error = %post_err, "failed to report disconnect failure");
                    }
                    Err(e)
                }
            },
            Some(ACTION_CANCEL) => Ok(ActionResponse::update_message(
                "Disconnect attempt cancelled successfully.",
            )),
            _ => Err(BridgeError::Unauthorized),
        }
    }

    // ── Verbs ────────────────────────────────────────────────────────────

    fn connect(&self, args: &CommandArgs) -> Post {
        match self.config.plugin_base_url() {
            Some(base) => self.text(
                args,
                format!("[Click here to connect your Gmail account with Mattermost.]({base}/oauth/connect)"),
            ),
            None => self.text(args, SITE_URL_MISSING.to_string()),
        }
    }

    async fn disconnect(&self, args: &CommandArgs) -> Post {
        match self.handshake.is_connected(&args.user_id).await {
            Ok(true) => {}
            Ok(false) => {
                return self.text(
                    args,
                    format!(
                        "You have not been connected with Gmail. Use `/{} connect` to get connected.",
                        self.config.command_trigger
                    ),
                );
            }
            Err(e) => return self.text(args, self.render_error(&args.user_id, &e)),
        }
        let Some(base) = self.config.plugin_base_url() else {
            return self.text(args, SITE_URL_MISSING.to_string());
        };

        let url = format!("{base}/command/disconnect");
        let button = |id: &str, name: &str, action: &str| {
            let mut context = Map::new();
            context.insert("action".into(), Value::from(action));
            context.insert(
                "action_secret".into(),
                Value::from(self.config.encryption_key.expose()),
            );
            ActionButton::new(id, name, url.as_str(), context)
        };

        let attachment = Attachment {
            title: "Disconnect Gmail".into(),
            text: ":scissors: Are you sure you would like to disconnect Gmail from Mattermost?".into(),
            actions: vec![
                button("disconnect", "Disconnect", ACTION_DISCONNECT),
                button("cancel", "Cancel", ACTION_CANCEL),
            ],
            ..Attachment::default()
        };
        Post::new(self.poster.bot_user_id(), args.channel_id.as_str(), "")
            .with_attachments(vec![attachment])
    }

    async fn import(&self, args: &CommandArgs, rest: &[&str]) -> String {
        if let Some(reply) = self.require_connected(args).await {
            return reply;
        }
        let trigger = &self.config.command_trigger;
        let Some(kind) = rest.first() else {
            return format!(
                "Please use `thread` or `mail` after `/{trigger} import`. Also provide the ID of thread/mail."
            );
        };
        if *kind != "mail" && *kind != "thread" {
            return format!("Only `thread` and `mail` are supported after `/{trigger} import`.");
        }
        let Some(rfc_id) = rest.get(1) else {
            return format!("Please provide the ID of {kind}");
        };

        let api = match self.connector.connect(&args.user_id).await {
            Ok(api) => api,
            Err(e) => return self.render_error(&args.user_id, &e),
        };
        let result = if *kind == "mail" {
            self.importer
                .import_mail(api.as_ref(), rfc_id, &args.channel_id, &args.user_id)
                .await
        } else {
            self.importer
                .import_thread(api.as_ref(), rfc_id, &args.channel_id, &args.user_id)
                .await
        };
        match result {
            Ok(posts) => format!("Imported the {kind} ({} posts).", posts.len()),
            Err(e) => self.render_error(&args.user_id, &e),
        }
    }

    async fn subscribe(&self, args: &CommandArgs, labels: &str) -> String {
        if let Some(reply) = self.require_connected(args).await {
            return reply;
        }
        match self.subscriptions.subscribe_text(&args.user_id, labels).await {
            Ok(set) => format!(
                "You have subscribed to the labels: {} successfully. Any previous subscription is overwritten.",
                join_labels(&set)
            ),
            Err(e) => self.render_error(&args.user_id, &e),
        }
    }

    async fn unsubscribe(&self, args: &CommandArgs, labels: &str) -> String {
        if let Some(reply) = self.require_connected(args).await {
            return reply;
        }
        match self.subscriptions.unsubscribe_text(&args.user_id, labels).await {
            Ok(result) => {
                let remaining = if result.remaining.is_empty() {
                    NO_SUBSCRIPTIONS.to_string()
                } else {
                    format!(
                        "You are currently subscribed to the labels: {}",
                        join_labels(&result.remaining)
                    )
                };
                format!(
                    "You have successfully unsubscribed from the labels: {}.\n{remaining}",
                    join_labels(&result.removed)
                )
            }
            Err(BridgeError::NothingToUnsubscribe) => {
                match self.subscriptions.list(&args.user_id).await {
                    Ok(current) if current.is_empty() => format!(
                        "You have not subscribed to any label. Use `/{} subscribe <labels>` to subscribe.",
                        self.config.command_trigger
                    ),
                    _ => "You have not been unsubscribed from any labels. Please check if you have specified correct label IDs.".to_string(),
                }
            }
            Err(e) => self.render_error(&args.user_id, &e),
        }
    }

    async fn list(&self, args: &CommandArgs) -> String {
        if let Some(reply) = self.require_connected(args).await {
            return reply;
        }
        match self.subscriptions.list(&args.user_id).await {
            Ok(set) if set.is_empty() => NO_SUBSCRIPTIONS.to_string(),
            Ok(set) => format!("You are currently subscribed to the labels: {}", join_labels(&set)),
            Err(e) => self.render_error(&args.user_id, &e),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    async fn require_connected(&self, args: &CommandArgs) -> Option<String> {
        match self.handshake.is_connected(&args.user_id).await {
            Ok(true) => None,
            Ok(false) => Some(self.not_connected_text()),
            Err(e) => Some(self.render_error(&args.user_id, &e)),
        }
    }

    fn not_connected_text(&self) -> String {
        format!(
            "Please connect yourself to Gmail using `/{} connect`.",
            self.config.command_trigger
        )
    }

    fn render_error(&self, user_id: &str, err: &BridgeError) -> String {
        match err {
            BridgeError::UnsupportedLabel(label) => format!(
                "Label ID: {label} not allowed. Supported labels: {}.",
                join_labels(&Label::all())
            ),
            BridgeError::MessageNotFound(reason) => reason.clone(),
            BridgeError::NotConnected => self.not_connected_text(),
            other => {
                error!(user_id = %user_id, error = %other, "command failed");
                "An error has occurred. Please try again later.".to_string()
            }
        }
    }

    fn text(&self, args: &CommandArgs, message: String) -> Post {
        Post::new(self.poster.bot_user_id(), args.channel_id.as_str(), message)
    }

    fn help_text(&self) -> String {
        let t = &self.config.command_trigger;
        format!(
            "##### Mailbridge for Gmail\nAvailable Commands:\n\
             * `/{t} connect` - Connect your Gmail account with your Mattermost account\n\
             * `/{t} disconnect` - Disconnect your Gmail account\n\
             * `/{t} import mail [id]` - Import a mail using its Message ID\n\
             * `/{t} import thread [id]` - Import a whole thread using the Message ID of any mail in it\n\
             * `/{t} subscribe [labels]` - Get notified about new mail with these labels (all labels when omitted)\n\
             * `/{t} unsubscribe [labels]` - Stop notifications for these labels (all when omitted)\n\
             * `/{t} subscriptions` - List your current subscriptions\n\
             * `/{t} help` - Display this help\n\
             Supported labels: {}",
            join_labels(&Label::all())
        )
    }
}
