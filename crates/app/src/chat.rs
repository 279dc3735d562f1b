use std::time::Duration;

use futures_util::StreamExt;
use irc::client::prelude::{Client, Command, Config, Response};
use metrics::counter;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use snowbot_core::{is_spam, responses, tokenize, BotCommand, RpsMove};
use snowbot_util::ChatConfig;

const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
const TWITCH_IRC_PORT: u16 = 6697;
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("irc error: {0}")]
    Irc(#[from] irc::error::Error),
    #[error("outbound chat queue is closed")]
    QueueClosed,
    #[error("chat connection closed by server")]
    Disconnected,
}

/// Line queued for delivery to a chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub text: String,
}

/// Handle onto the single outbound chat queue.
///
/// Every producer goes through this queue so lines reach chat in the order
/// they were enqueued.
#[derive(Debug, Clone)]
pub struct ChatSender {
    channel: String,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChatSender {
    /// `channel` is the login name of the joined channel, without `#`.
    pub fn new(channel: &str) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Self {
            channel: format!("#{channel}"),
            tx,
        };
        (sender, rx)
    }

    /// Queues a line for the bot's own channel.
    pub fn say(&self, text: impl Into<String>) -> Result<(), ChatError> {
        self.say_to(&self.channel, text)
    }

    pub fn say_to(&self, target: &str, text: impl Into<String>) -> Result<(), ChatError> {
        self.tx
            .send(OutboundMessage {
                channel: target.to_string(),
                text: text.into(),
            })
            .map_err(|_| ChatError::QueueClosed)
    }
}

/// Chat-side behaviour: command replies and the spam guard.
#[derive(Clone)]
pub struct ChatBot {
    username: String,
    sender: ChatSender,
}

impl ChatBot {
    pub fn new(username: impl Into<String>, sender: ChatSender) -> Self {
        Self {
            username: username.into(),
            sender,
        }
    }

    pub fn on_connected(&self, host: &str, port: u16) {
        info!(stage = "chat", host, port, user = %self.username, "connected to chat");
    }

    pub fn on_message(
        &self,
        target: &str,
        sender_login: &str,
        text: &str,
        is_self: bool,
    ) -> Result<(), ChatError> {
        if is_self {
            return Ok(());
        }

        if let Some(parsed) = tokenize(text) {
            match BotCommand::from_name(&parsed.name) {
                Some(command) => {
                    let reply = command.respond(parsed.argument, sender_login, random_move);
                    debug!(
                        stage = "chat",
                        command = command.as_str(),
                        user = sender_login,
                        "executed command"
                    );
                    counter!("chat_commands_total", "command" => command.as_str()).increment(1);
                    self.sender.say_to(target, reply)?;
                }
                None => debug!(stage = "chat", command = %parsed.name, "unknown command"),
            }
        }

        if is_spam(text) {
            warn!(stage = "chat", user = sender_login, "timing out spam message");
            self.sender.say_to(target, responses::timeout(sender_login))?;
        }

        Ok(())
    }

    fn is_self(&self, login: &str) -> bool {
        login.eq_ignore_ascii_case(&self.username)
    }
}

fn random_move() -> RpsMove {
    RpsMove::ALL[rand::thread_rng().gen_range(0..RpsMove::ALL.len())]
}

/// IRC connection to Twitch chat.
pub struct ChatConnection {
    config: ChatConfig,
    bot: ChatBot,
}

impl ChatConnection {
    pub fn new(config: ChatConfig, bot: ChatBot) -> Self {
        Self { config, bot }
    }

    /// Keeps the connection up, reconnecting with backoff. Returns once the
    /// outbound queue is closed.
    ///
    /// A line whose write failed is held and sent first on the next session.
    pub async fn run_forever(self, mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) {
        let mut backoff = Backoff::default();
        let mut pending = None;
        loop {
            let mut welcomed = false;
            match self.run_once(&mut outbound, &mut pending, &mut welcomed).await {
                Ok(()) => {
                    info!(stage = "chat", "outbound queue closed; stopping chat connection");
                    return;
                }
                Err(err) => {
                    if welcomed {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();
                    error!(
                        stage = "chat",
                        error = %err,
                        retry_in_secs = delay.as_secs(),
                        held_line = pending.is_some(),
                        "chat connection failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn run_once(
        &self,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        pending: &mut Option<OutboundMessage>,
        welcomed: &mut bool,
    ) -> Result<(), ChatError> {
        let mut client = Client::from_config(self.irc_config()).await?;
        client.identify()?;
        let mut stream = client.stream()?;
        let sender = client.sender();
        let send = |message: &OutboundMessage| sender.send_privmsg(&message.channel, &message.text);

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(message)) => {
                        if self.dispatch(&message) {
                            *welcomed = true;
                            if let Some(held) = pending.take() {
                                deliver_or_hold(send, held, pending)?;
                            }
                        }
                    }
                    Some(Err(err)) => return Err(err.into()),
                    None => return Err(ChatError::Disconnected),
                },
                queued = outbound.recv(), if pending.is_none() => match queued {
                    Some(message) => deliver_or_hold(send, message, pending)?,
                    None => return Ok(()),
                },
            }
        }
    }

    /// Returns `true` on the server welcome.
    fn dispatch(&self, message: &irc::proto::Message) -> bool {
        match &message.command {
            Command::PRIVMSG(target, text) => {
                let login = message.source_nickname().unwrap_or_default();
                let is_self = self.bot.is_self(login);
                if let Err(err) = self.bot.on_message(target, login, text, is_self) {
                    error!(stage = "chat", error = %err, "failed to queue chat reply");
                }
                false
            }
            Command::Response(Response::RPL_WELCOME, _) => {
                self.bot.on_connected(TWITCH_IRC_HOST, TWITCH_IRC_PORT);
                true
            }
            _ => false,
        }
    }

    fn irc_config(&self) -> Config {
        Config {
            nickname: Some(self.config.username.clone()),
            password: Some(format!("oauth:{}", self.config.oauth_token)),
            server: Some(TWITCH_IRC_HOST.to_string()),
            port: Some(TWITCH_IRC_PORT),
            use_tls: Some(true),
            channels: vec![format!("#{}", self.config.channel)],
            ..Config::default()
        }
    }
}

/// Reconnect delay: doubles per failed attempt up to a cap.
#[derive(Debug)]
struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: RECONNECT_BASE_DELAY,
        }
    }
}

impl Backoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(RECONNECT_MAX_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.next = RECONNECT_BASE_DELAY;
    }
}

fn deliver_or_hold<F>(
    send: F,
    message: OutboundMessage,
    pending: &mut Option<OutboundMessage>,
) -> Result<(), ChatError>
where
    F: FnOnce(&OutboundMessage) -> Result<(), irc::error::Error>,
{
    match send(&message) {
        Ok(()) => {
            counter!("chat_messages_sent_total").increment(1);
            Ok(())
        }
        Err(err) => {
            warn!(stage = "chat", channel = %message.channel, "holding chat line until reconnect");
            *pending = Some(message);
            Err(err.into())
        }
    }
}
