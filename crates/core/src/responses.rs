//! Canned chat lines.

pub const COCO: &str = "snowxcCoco";

pub const SUBRAID: &str = "snowxcHype snowxcHype snowxcHype Snow is falling into chat #SnowxconesRaid snowxcBoop snowxcHype snowxcHype snowxcHype Snow is falling into chat #SnowxconesRaid snowxcBoop snowxcHype snowxcHype snowxcHypeSnow is falling into chat #SnowxconesRaid snowxcBoop";

pub const RPS_USAGE: &str = "Please type !rps followed by rock, paper, or scissors to play!";
pub const RPS_TIE: &str = "A tie.. rematch? snowxcAngel";
pub const RPS_USER_WINS: &str = "You win, I lose!! snowxcFisticuffs";
pub const RPS_BOT_WINS: &str = "You lose, I win!! hehehehehe snowxcHype";

pub const SPAM_PHRASE: &str = "want more follower";
pub const SPAM_TIMEOUT_SECS: u32 = 300;

pub fn hug(sender: &str, recipient: Option<&str>) -> String {
    match recipient {
        Some(recipient) => format!(
            "{sender} wraps {recipient} in a polar bear hug snowxcHug snowxcHug snowxcHug"
        ),
        None => format!("{sender} has no one to hug......"),
    }
}

pub fn working_on(sender: &str) -> String {
    format!(
        "{sender}, thanks for asking! Snow is currently working on making a website using pure html/css, no javascript."
    )
}

pub fn timeout(user: &str) -> String {
    format!("/timeout {user} {SPAM_TIMEOUT_SECS}")
}

pub fn follow(follower: &str) -> String {
    format!(
        "♡ snowxcAngel A new snowflake has fallen into our lives! Welcome {follower} snowxcAngel ♡"
    )
}

/// Subscription congratulation, with the gifter clause appended when known.
pub fn subscribe(subscriber: &str, gifter: Option<&str>) -> String {
    let base = format!(
        "{subscriber}, I hope you like kids because you're now a polar bear parent snowxcShook snowxcShook snowxcShook Each sub badge is a new milestone in your polar bear child's life.. Godspeed!! snowxcHype"
    );
    match gifter {
        Some(gifter) => format!(
            "{base} Don't forget to tell {gifter} how you feel about their confidence in your parenting abilities snowxcAngel snowxcAngel snowxcAngel"
        ),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_without_gifter_has_no_attribution() {
        let text = subscribe("alice", None);
        assert!(text.starts_with("alice, I hope you like kids"));
        assert!(!text.contains("Don't forget to tell"));
    }

    #[test]
    fn subscribe_with_gifter_names_them() {
        let text = subscribe("alice", Some("bob"));
        assert!(text.contains("Don't forget to tell bob"));
    }
}
