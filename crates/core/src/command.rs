use crate::responses;

/// Chat line split into a command name and the remaining argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand<'a> {
    /// Lowercased, including the leading `!`.
    pub name: String,
    pub argument: Option<&'a str>,
}

/// Splits a chat line at the first whitespace run.
///
/// Returns `None` for lines that are not `!`-prefixed commands.
pub fn tokenize(text: &str) -> Option<ParsedCommand<'_>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('!') {
        return None;
    }

    let (name, rest) = match trimmed.find(char::is_whitespace) {
        Some(index) => (&trimmed[..index], trimmed[index..].trim_start()),
        None => (trimmed, ""),
    };
    if name.len() == 1 {
        return None;
    }

    Some(ParsedCommand {
        name: name.to_lowercase(),
        argument: (!rest.is_empty()).then_some(rest),
    })
}

/// Commands the bot answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Coco,
    SubRaid,
    Rps,
    Hug,
    WorkingOn,
}

impl BotCommand {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "!coco" => Some(Self::Coco),
            "!subraid" => Some(Self::SubRaid),
            "!rps" => Some(Self::Rps),
            "!hug" => Some(Self::Hug),
            "!workingon" => Some(Self::WorkingOn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coco => "coco",
            Self::SubRaid => "subraid",
            Self::Rps => "rps",
            Self::Hug => "hug",
            Self::WorkingOn => "workingon",
        }
    }

    /// Builds the reply. `bot_move` is only consulted by a valid `!rps` round.
    pub fn respond(
        self,
        argument: Option<&str>,
        sender: &str,
        bot_move: impl FnOnce() -> RpsMove,
    ) -> String {
        match self {
            Self::Coco => responses::COCO.to_string(),
            Self::SubRaid => responses::SUBRAID.to_string(),
            Self::Rps => play_rps(argument, bot_move),
            Self::Hug => responses::hug(sender, argument),
            Self::WorkingOn => responses::working_on(sender),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpsMove {
    Rock,
    Paper,
    Scissors,
}

impl RpsMove {
    pub const ALL: [RpsMove; 3] = [RpsMove::Rock, RpsMove::Paper, RpsMove::Scissors];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "rock" => Some(Self::Rock),
            "paper" => Some(Self::Paper),
            "scissors" => Some(Self::Scissors),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rock => "rock",
            Self::Paper => "paper",
            Self::Scissors => "scissors",
        }
    }

    pub fn beats(self, other: RpsMove) -> bool {
        matches!(
            (self, other),
            (Self::Rock, Self::Scissors) | (Self::Paper, Self::Rock) | (Self::Scissors, Self::Paper)
        )
    }
}

fn play_rps(argument: Option<&str>, bot_move: impl FnOnce() -> RpsMove) -> String {
    let Some(user_move) = argument.and_then(RpsMove::parse) else {
        return responses::RPS_USAGE.to_string();
    };

    let bot_move = bot_move();
    let outcome = if user_move == bot_move {
        responses::RPS_TIE
    } else if user_move.beats(bot_move) {
        responses::RPS_USER_WINS
    } else {
        responses::RPS_BOT_WINS
    };
    format!("I chose {}. {outcome}", bot_move.as_str())
}

/// Returns `true` for the follower-selling spam the bot times out.
pub fn is_spam(text: &str) -> bool {
    text.to_lowercase().contains(responses::SPAM_PHRASE)
}
