use crate::{
    command::{embed, GROUP_SOCIAL},
    context::Context,
    definition::{Category, CommandDef, OptionSpec},
    error::BotError,
    registry::{Command, ComponentHandler, Invocation, SlashCommand},
    respond::{update_component_message, Respond},
};
use anyhow::Result;
use serenity::all::{
    ButtonStyle, ComponentInteraction, CreateActionRow, CreateButton,
    CreateInteractionResponseMessage, Mentionable, UserId,
};
use std::{fmt, str::FromStr};

/// Asks a member for consent, with buttons for the answer
pub struct Ask;

const CONSENTS: [&str; 4] = ["DM", "Ping", "Voice", "Photo"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Accept,
    Deny,
    Revoke,
}

impl Answer {
    fn as_str(self) -> &'static str {
        match self {
            Answer::Accept => "accept",
            Answer::Deny => "deny",
            Answer::Revoke => "revoke",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    asker: UserId,
    target: UserId,
    consent: String,
}

#[derive(Debug, PartialEq, Eq)]
struct Press {
    request: Request,
    answer: Answer,
}

impl Request {
    fn custom_id(&self, answer: Answer) -> String {
        format!(
            "ask:{}:{}:{}:{}",
            self.asker,
            self.target,
            self.consent,
            answer.as_str()
        )
    }

    /// Who may press `answer`: the target decides, the asker takes it back.
    fn may_press(&self, user: UserId, answer: Answer) -> bool {
        match answer {
            Answer::Accept | Answer::Deny => user == self.target,
            Answer::Revoke => user == self.asker,
        }
    }
}

impl FromStr for Press {
    type Err = BotError;

    /// Parses the payload after `ask:`, i.e. `asker:target:consent:answer`.
    fn from_str(payload: &str) -> Result<Self, Self::Err> {
        let bad = || BotError::Protocol(format!("ask:{}", payload));
        let parts: Vec<&str> = payload.split(':').collect();
        let [asker, target, consent, answer] = parts[..] else {
            return Err(bad());
        };
        let asker = asker.parse::<u64>().map_err(|_| bad())?;
        let target = target.parse::<u64>().map_err(|_| bad())?;
        if asker == 0 || target == 0 || !CONSENTS.contains(&consent) {
            return Err(bad());
        }
        let answer = match answer {
            "accept" => Answer::Accept,
            "deny" => Answer::Deny,
            "revoke" => Answer::Revoke,
            _ => return Err(bad()),
        };
        Ok(Press {
            request: Request {
                asker: UserId::new(asker),
                target: UserId::new(target),
                consent: consent.to_owned(),
            },
            answer,
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} asks {} for **{}** consent.",
            self.asker.mention(),
            self.target.mention(),
            self.consent
        )
    }
}

fn buttons(request: &Request) -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new(request.custom_id(Answer::Accept))
            .label("Accept")
            .style(ButtonStyle::Success),
        CreateButton::new(request.custom_id(Answer::Deny))
            .label("Deny")
            .style(ButtonStyle::Danger),
        CreateButton::new(request.custom_id(Answer::Revoke))
            .label("Revoke")
            .style(ButtonStyle::Secondary),
    ])
}

fn outcome(request: &Request, answer: Answer) -> String {
    match answer {
        Answer::Accept => format!(
            "{} gave {} **{}** consent.",
            request.target.mention(),
            request.asker.mention(),
            request.consent
        ),
        Answer::Deny => format!(
            "{} declined **{}** consent for {}.",
            request.target.mention(),
            request.consent,
            request.asker.mention()
        ),
        Answer::Revoke => format!(
            "{} withdrew the **{}** request.",
            request.asker.mention(),
            request.consent
        ),
    }
}

#[serenity::async_trait]
impl Command for Ask {
    fn name(&self) -> &str {
        "ask"
    }

    fn as_slash(&self) -> Option<&dyn SlashCommand> {
        Some(self)
    }

    fn as_component(&self) -> Option<&dyn ComponentHandler> {
        Some(self)
    }

    async fn run(&self, ctx: &Context<'_>, inv: &Invocation<'_>) -> Result<()> {
        let options = inv.options();
        let consent = options.require_str("consent_type")?;
        if !CONSENTS.contains(&consent) {
            return Err(BotError::InvalidInput(format!("Unknown consent type `{}`.", consent)).into());
        }
        let target = options
            .user("member")
            .ok_or_else(|| BotError::InvalidInput("Pick a member to ask.".to_owned()))?;
        let asker = inv.user().id;

        if target == asker {
            return Err(BotError::InvalidInput("You can't ask yourself.".to_owned()).into());
        }
        if ctx.cfg.is_protected(target) {
            return Err(BotError::PermissionDenied("That member can't be asked.".to_owned()).into());
        }
        let is_bot = inv
            .interaction()
            .data
            .resolved
            .users
            .get(&target)
            .is_some_and(|user| user.bot);
        if is_bot {
            return Err(BotError::InvalidInput("Bots can't give consent.".to_owned()).into());
        }

        let request = Request {
            asker,
            target,
            consent: consent.to_owned(),
        };
        let mut card = embed("Consent request", request.to_string());
        if let Some(reason) = options.str("reason") {
            card = card.field("Reason", reason, false);
        }

        inv.interaction()
            .respond(
                ctx.http,
                CreateInteractionResponseMessage::new()
                    .content(target.mention().to_string())
                    .embed(card)
                    .components(vec![buttons(&request)]),
            )
            .await
    }
}

#[serenity::async_trait]
impl ComponentHandler for Ask {
    async fn component(
        &self,
        ctx: &Context<'_>,
        interaction: &ComponentInteraction,
        payload: &str,
    ) -> Result<()> {
        let press: Press = payload.parse()?;
        if !press.request.may_press(interaction.user.id, press.answer) {
            return interaction
                .reply_ephemeral(ctx.http, "This button isn't yours to press.")
                .await;
        }

        update_component_message(
            interaction,
            ctx.http,
            CreateInteractionResponseMessage::new()
                .embed(embed("Consent request", outcome(&press.request, press.answer)))
                .components(Vec::new()),
        )
        .await
    }
}

impl SlashCommand for Ask {
    fn definition(&self) -> CommandDef {
        let mut consent = OptionSpec::string("consent_type", "What you are asking for").required();
        for kind in CONSENTS {
            consent = consent.choice(kind, kind);
        }
        CommandDef::new("ask", "Ask a member for consent")
            .category(Category::Social)
            .group(GROUP_SOCIAL)
            .option(consent)
            .option(OptionSpec::user("member", "Who to ask").required())
            .option(OptionSpec::string("reason", "Why you are asking"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses() {
        let press: Press = "111:222:DM:accept".parse().unwrap();
        assert_eq!(press.request.asker, UserId::new(111));
        assert_eq!(press.request.target, UserId::new(222));
        assert_eq!(press.request.consent, "DM");
        assert_eq!(press.answer, Answer::Accept);
    }

    #[test]
    fn malformed_payloads_are_protocol_errors() {
        for payload in [
            "",
            "111:222:DM",
            "111:222:DM:accept:extra",
            "x:222:DM:accept",
            "111:222:Hug:accept",
            "111:222:DM:maybe",
            "0:222:DM:accept",
        ] {
            let err = payload.parse::<Press>().unwrap_err();
            assert!(matches!(err, BotError::Protocol(_)), "{}", payload);
        }
    }

    #[test]
    fn custom_ids_round_through_the_router() {
        let request = Request {
            asker: UserId::new(111),
            target: UserId::new(222),
            consent: "Voice".to_owned(),
        };
        let id = request.custom_id(Answer::Revoke);
        assert_eq!(id, "ask:111:222:Voice:revoke");
        let (key, payload) = crate::dispatch::route_component(["ask", "complete"], &id).unwrap();
        assert_eq!(key, "ask");
        let press: Press = payload.parse().unwrap();
        assert_eq!(press.request, request);
    }

    #[test]
    fn only_the_right_member_may_press() {
        let request = Request {
            asker: UserId::new(1),
            target: UserId::new(2),
            consent: "Ping".to_owned(),
        };
        assert!(request.may_press(UserId::new(2), Answer::Accept));
        assert!(request.may_press(UserId::new(2), Answer::Deny));
        assert!(!request.may_press(UserId::new(1), Answer::Accept));
        assert!(request.may_press(UserId::new(1), Answer::Revoke));
        assert!(!request.may_press(UserId::new(2), Answer::Revoke));
        assert!(!request.may_press(UserId::new(3), Answer::Deny));
    }
}
