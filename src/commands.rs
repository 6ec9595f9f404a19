//! `hidearmor` command parsing and execution
//!
//! Commands only touch the visibility store. What needs re-sending
//! afterwards is returned to the caller, which owns the world queue.

use crate::visibility::{
    format_group, ArmorSlot, MaskGroup, PlayerId, SlotSet, VisibilityMask, VisibilityStore,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: hidearmor [status|all|hideothers|allowothers|on|off] [piece]")]
    Usage,
    #[error("Unknown piece '{0}', use head, chest, hands or legs")]
    UnknownPiece(String),
    #[error("'{0}' requires admin permission")]
    NotAllowed(&'static str),
}

/// One piece or every piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Piece(ArmorSlot),
    All,
}

impl Target {
    fn parse(arg: Option<&str>) -> Result<Self, CommandError> {
        match arg {
            None => Err(CommandError::Usage),
            Some(arg) if arg.eq_ignore_ascii_case("all") => Ok(Target::All),
            Some(arg) => parse_piece(arg).map(Target::Piece),
        }
    }
}

fn parse_piece(arg: &str) -> Result<ArmorSlot, CommandError> {
    ArmorSlot::parse(arg).ok_or_else(|| CommandError::UnknownPiece(arg.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorCommand {
    Status,
    /// Flip one of the player's own slots, or all of them
    Toggle(Target),
    /// `on` hides, `off` shows
    Set { target: Target, hidden: bool },
    HideOthers(Target),
    AllowOthers(Target),
    /// Admin: flip a slot of the default mask
    Default(ArmorSlot),
    /// Admin: flip a forced slot
    Force(ArmorSlot),
}

/// Equipment that must be re-sent after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    Nothing,
    /// The issuing player's own equipment
    Player,
    /// Every online player's equipment
    Everyone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: String,
    pub refresh: RefreshScope,
}

impl CommandOutcome {
    fn new(reply: String, refresh: RefreshScope) -> Self {
        Self { reply, refresh }
    }
}

impl ArmorCommand {
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let mut args = input.split_whitespace();
        let first = args.next().ok_or(CommandError::Usage)?.to_ascii_lowercase();
        let second = args.next();

        let command = match first.as_str() {
            "status" => ArmorCommand::Status,
            "all" => ArmorCommand::Toggle(Target::All),
            "on" | "off" => ArmorCommand::Set {
                target: Target::parse(second)?,
                hidden: first == "on",
            },
            "hideothers" => ArmorCommand::HideOthers(Target::parse(second)?),
            "allowothers" => ArmorCommand::AllowOthers(Target::parse(second)?),
            "default" => ArmorCommand::Default(parse_piece(second.ok_or(CommandError::Usage)?)?),
            "force" => ArmorCommand::Force(parse_piece(second.ok_or(CommandError::Usage)?)?),
            piece => ArmorCommand::Toggle(Target::Piece(
                ArmorSlot::parse(piece).ok_or(CommandError::Usage)?,
            )),
        };
        Ok(command)
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, ArmorCommand::Default(_) | ArmorCommand::Force(_))
    }

    pub fn execute(
        &self,
        store: &VisibilityStore,
        player: PlayerId,
        is_admin: bool,
    ) -> Result<CommandOutcome, CommandError> {
        if self.requires_admin() && !is_admin {
            return Err(CommandError::NotAllowed(self.name()));
        }

        let outcome = match *self {
            ArmorCommand::Status => CommandOutcome::new(status(store, player), RefreshScope::Nothing),
            ArmorCommand::Toggle(target) => {
                let mask = toggle(store, player, MaskGroup::SelfHidden, target);
                CommandOutcome::new(describe(MaskGroup::SelfHidden, mask), RefreshScope::Player)
            }
            ArmorCommand::Set { target, hidden } => {
                let mask = match target {
                    Target::All => store.set_group(player, MaskGroup::SelfHidden, hidden),
                    Target::Piece(slot) => store.set_slot(player, MaskGroup::SelfHidden, slot, hidden),
                };
                CommandOutcome::new(describe(MaskGroup::SelfHidden, mask), RefreshScope::Player)
            }
            ArmorCommand::HideOthers(target) => {
                let mask = toggle(store, player, MaskGroup::HideOthers, target);
                CommandOutcome::new(describe(MaskGroup::HideOthers, mask), RefreshScope::Everyone)
            }
            ArmorCommand::AllowOthers(target) => {
                let mask = toggle(store, player, MaskGroup::AllowOthers, target);
                CommandOutcome::new(describe(MaskGroup::AllowOthers, mask), RefreshScope::Player)
            }
            ArmorCommand::Default(slot) => {
                let mask = store.toggle_default_bit(MaskGroup::SelfHidden.bit(slot));
                CommandOutcome::new(
                    format!("Default hidden armor: {}", format_group(mask, MaskGroup::SelfHidden)),
                    RefreshScope::Everyone,
                )
            }
            ArmorCommand::Force(slot) => {
                let mask = store.toggle_forced_slot(slot);
                CommandOutcome::new(
                    format!("Forced hidden armor: {}", format_group(mask, MaskGroup::SelfHidden)),
                    RefreshScope::Everyone,
                )
            }
        };
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        match self {
            ArmorCommand::Status => "status",
            ArmorCommand::Toggle(_) => "toggle",
            ArmorCommand::Set { hidden: true, .. } => "on",
            ArmorCommand::Set { hidden: false, .. } => "off",
            ArmorCommand::HideOthers(_) => "hideothers",
            ArmorCommand::AllowOthers(_) => "allowothers",
            ArmorCommand::Default(_) => "default",
            ArmorCommand::Force(_) => "force",
        }
    }
}

/// Toggle a slot, or for `all` set the whole group unless it is already full
fn toggle(store: &VisibilityStore, player: PlayerId, group: MaskGroup, target: Target) -> VisibilityMask {
    match target {
        Target::Piece(slot) => store.toggle_slot(player, group, slot),
        Target::All => {
            let full = store.mask(player).slots(group) == SlotSet::ALL;
            store.set_group(player, group, !full)
        }
    }
}

fn group_title(group: MaskGroup) -> &'static str {
    match group {
        MaskGroup::SelfHidden => "Hide My Armor",
        MaskGroup::HideOthers => "Hide Others' Armor",
        MaskGroup::AllowOthers => "Allow Others",
    }
}

fn describe(group: MaskGroup, mask: VisibilityMask) -> String {
    format!("{}: {}", group_title(group), format_group(mask, group))
}

fn status(store: &VisibilityStore, player: PlayerId) -> String {
    let mask = store.mask(player);
    let mut lines = vec!["=== Armor Visibility Settings ===".to_string()];
    for group in [MaskGroup::SelfHidden, MaskGroup::HideOthers, MaskGroup::AllowOthers] {
        lines.push(describe(group, mask));
    }
    let forced = store.forced_mask();
    if !forced.is_empty() {
        lines.push(format!("Forced by server: {}", format_group(forced, MaskGroup::SelfHidden)));
    }
    lines.join("\n")
}
