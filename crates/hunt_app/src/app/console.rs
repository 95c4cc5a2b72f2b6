use std::collections::HashMap;

use hunt_engine::{
    ClickOutcome, EntitlementProvider, GenerationEndpoint, GenerationSuccess, HuntSession,
    InteractionMode, LatLng, NoticeLevel, PaymentProcessor, PricingSurface, RecordId,
    RemoteStore,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConsoleCommand {
    Help,
    TogglePoint,
    ToggleArea,
    Click { at: LatLng },
    Save { title: String, note: String },
    Cancel,
    AddArea {
        center: LatLng,
        radius_m: f64,
        label: String,
    },
    Select { id: RecordId },
    Delete { id: RecordId },
    Confirm { id: RecordId },
    Buzz,
    Center { at: LatLng },
    Refresh,
    Price,
    Frame,
    Audit,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CommandParseError {
    reason: String,
    usage: String,
}

impl CommandParseError {
    fn new(reason: impl Into<String>, usage: &str) -> Self {
        Self {
            reason: reason.into(),
            usage: usage.to_string(),
        }
    }
}

type ParseFn = fn(&[String]) -> Result<ConsoleCommand, CommandParseError>;

pub(crate) struct CommandSpec {
    name: String,
    help: String,
    arg_schema: String,
    parse: ParseFn,
}

pub(crate) struct ConsoleCommandRegistry {
    specs: Vec<CommandSpec>,
    lookup_by_lower_name: HashMap<String, usize>,
}

const HUNT_COMMANDS: &[(&str, &str, &str, ParseFn)] = &[
    ("help", "List commands", "", parse_help_command),
    ("point", "Toggle point placement", "", parse_point_command),
    (
        "area",
        "Toggle search area generation by click",
        "",
        parse_area_command,
    ),
    (
        "click",
        "Click the map",
        "<lat:f64> <lng:f64>",
        parse_click_command,
    ),
    (
        "save",
        "Save the pending point",
        "<title> [note...]",
        parse_save_command,
    ),
    ("cancel", "Discard the pending point", "", parse_cancel_command),
    (
        "add_area",
        "Add a manual search area",
        "<lat:f64> <lng:f64> <radius_m:f64> <label...>",
        parse_add_area_command,
    ),
    ("select", "Select an area or point", "<id>", parse_select_command),
    (
        "delete",
        "Ask to delete an area or point",
        "<id>",
        parse_delete_command,
    ),
    (
        "confirm",
        "Confirm a requested delete",
        "<id>",
        parse_confirm_command,
    ),
    (
        "buzz",
        "Generate a search area at the map centre",
        "",
        parse_buzz_command,
    ),
    (
        "center",
        "Move the map centre",
        "<lat:f64> <lng:f64>",
        parse_center_command,
    ),
    ("refresh", "Reconcile with the store", "", parse_refresh_command),
    ("price", "Show current and next price", "", parse_price_command),
    ("frame", "Print the render frame as json", "", parse_frame_command),
    ("audit", "Show the local audit journal", "", parse_audit_command),
    ("quit", "Quit", "", parse_quit_command),
];

impl ConsoleCommandRegistry {
    pub(crate) fn new() -> Self {
        Self {
            specs: Vec::new(),
            lookup_by_lower_name: HashMap::new(),
        }
    }

    pub(crate) fn with_hunt_commands() -> Result<Self, String> {
        let mut registry = Self::new();
        for (name, help, arg_schema, parse) in HUNT_COMMANDS {
            registry.register(*name, *help, *arg_schema, *parse)?;
        }
        Ok(registry)
    }

    pub(crate) fn register(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        arg_schema: impl Into<String>,
        parse: ParseFn,
    ) -> Result<(), String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("command name cannot be empty".to_string());
        }
        let lower = name.to_ascii_lowercase();
        if self.lookup_by_lower_name.contains_key(&lower) {
            return Err(format!("duplicate command registration: {name}"));
        }

        self.specs.push(CommandSpec {
            name,
            help: help.into(),
            arg_schema: arg_schema.into(),
            parse,
        });
        self.lookup_by_lower_name
            .insert(lower, self.specs.len() - 1);
        Ok(())
    }

    pub(crate) fn lookup(&self, input_name: &str) -> Option<&CommandSpec> {
        let lower = input_name.to_ascii_lowercase();
        let index = self.lookup_by_lower_name.get(&lower)?;
        self.specs.get(*index)
    }

    pub(crate) fn iter_specs_in_order(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.specs.iter().map(|spec| {
            (
                spec.name.as_str(),
                spec.help.as_str(),
                spec.arg_schema.as_str(),
            )
        })
    }

    /// Tokenizes and parses one input line. `Ok(None)` for a blank line;
    /// `Err` carries the finished `error: ...` output line.
    pub(crate) fn parse_line(&self, raw_line: &str) -> Result<Option<ConsoleCommand>, String> {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let tokens =
            tokenize_line(trimmed).map_err(|reason| format!("error: {reason}. usage: help"))?;
        let Some((command_name, args)) = tokens.split_first() else {
            return Ok(None);
        };
        let Some(spec) = self.lookup(command_name) else {
            return Err(format!(
                "error: unknown command '{command_name}'. usage: help"
            ));
        };

        (spec.parse)(args)
            .map(Some)
            .map_err(|error| format!("error: {}. usage: {}", error.reason, error.usage))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleFlow {
    Continue,
    Quit,
}

pub(crate) struct ConsoleCommandProcessor {
    registry: ConsoleCommandRegistry,
}

impl ConsoleCommandProcessor {
    pub(crate) fn new() -> Result<Self, String> {
        Ok(Self {
            registry: ConsoleCommandRegistry::with_hunt_commands()?,
        })
    }

    /// Runs one input line against the session and returns the output lines,
    /// followed by any notices the session queued while running it.
    pub(crate) async fn process_line<R, E, P, G>(
        &self,
        session: &HuntSession<R, E, P, G>,
        raw_line: &str,
    ) -> (Vec<String>, ConsoleFlow)
    where
        R: RemoteStore,
        E: EntitlementProvider,
        P: PaymentProcessor,
        G: GenerationEndpoint,
    {
        let mut output = Vec::new();
        let flow = match self.registry.parse_line(raw_line) {
            Ok(Some(command)) => self.execute(session, command, &mut output).await,
            Ok(None) => ConsoleFlow::Continue,
            Err(line) => {
                output.push(line);
                ConsoleFlow::Continue
            }
        };

        for notice in session.drain_notices() {
            let tag = match notice.level {
                NoticeLevel::Info => "info",
                NoticeLevel::Error => "error",
            };
            output.push(format!("[{tag}] {}", notice.message));
        }
        (output, flow)
    }

    async fn execute<R, E, P, G>(
        &self,
        session: &HuntSession<R, E, P, G>,
        command: ConsoleCommand,
        out: &mut Vec<String>,
    ) -> ConsoleFlow
    where
        R: RemoteStore,
        E: EntitlementProvider,
        P: PaymentProcessor,
        G: GenerationEndpoint,
    {
        match command {
            ConsoleCommand::Help => {
                for (name, help, arg_schema) in self.registry.iter_specs_in_order() {
                    let line = if arg_schema.is_empty() {
                        format!("{name} - {help}")
                    } else {
                        format!("{name} {arg_schema} - {help}")
                    };
                    out.push(line);
                }
            }
            ConsoleCommand::TogglePoint => {
                out.push(describe_mode(session.toggle_adding_point()));
            }
            ConsoleCommand::ToggleArea => match session.toggle_adding_area().await {
                Ok(mode) => out.push(describe_mode(mode)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Click { at } => match session.click(at).await {
                Ok(ClickOutcome::Ignored) => out.push("click ignored (mode: idle)".to_string()),
                Ok(ClickOutcome::PendingPointPlaced(pending)) => out.push(format!(
                    "pending point at {:.5}, {:.5}; save <title> [note...] or cancel",
                    pending.center.lat, pending.center.lng
                )),
                Ok(ClickOutcome::Generated(success)) => out.push(describe_generation(&success)),
                Ok(ClickOutcome::GenerationFailed(error)) => {
                    out.push(format!("generation failed: {error}"))
                }
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Save { title, note } => {
                let saved = match session.edit_pending_point(&title, &note) {
                    Ok(()) => session.save_pending_point().await,
                    Err(error) => Err(error),
                };
                match saved {
                    Ok(point) => out.push(format!("saved point {} \"{}\"", point.id, point.title)),
                    Err(error) => out.push(format!("error: {error}")),
                }
            }
            ConsoleCommand::Cancel => {
                if session.cancel_pending_point() {
                    out.push("pending point discarded".to_string());
                } else {
                    out.push("no pending point".to_string());
                }
            }
            ConsoleCommand::AddArea {
                center,
                radius_m,
                label,
            } => match session.add_search_area(center, radius_m, &label).await {
                Ok(area) => out.push(format!("added search area {} \"{}\"", area.id, area.label)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Select { id } => match session.select(id) {
                Ok(item) => out.push(format!("selected {:?} {}", item.kind, item.id)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Delete { id } => match session.arm_delete(id) {
                Ok(item) => out.push(format!("delete {} requested; confirm {}", item.id, item.id)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Confirm { id } => match session.confirm_delete(id).await {
                Ok(item) => out.push(format!("deleted {:?} {}", item.kind, item.id)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Buzz => match session.buzz().await {
                Ok(success) => out.push(describe_generation(&success)),
                Err(error) => out.push(format!("generation failed: {error}")),
            },
            ConsoleCommand::Center { at } => match session.set_map_center(at) {
                Ok(()) => out.push(format!("map centre {:.5}, {:.5}", at.lat, at.lng)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Refresh => {
                let report = session.refresh().await;
                let lists = session.sync().lists();
                out.push(format!(
                    "refreshed from {:?}: {} search areas, {} generated areas, {} points",
                    report.source,
                    lists.search_areas.len(),
                    lists.generated_areas.len(),
                    lists.map_points.len()
                ));
            }
            ConsoleCommand::Price => match session.preview().await {
                Ok(preview) => {
                    out.push(format!(
                        "generations so far: {}",
                        preview.generation_count
                    ));
                    out.push(format!(
                        "next area: {:.2} km for {}",
                        preview.current.radius_km, preview.current.price
                    ));
                    out.push(format!(
                        "one after: {:.2} km for {}",
                        preview.next.radius_km, preview.next.price
                    ));
                    out.push(format!(
                        "clue buzz at {} clues: {}",
                        preview.generation_count,
                        session.quote(PricingSurface::ClueBuzz, preview.generation_count)
                    ));
                }
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Frame => match serde_json::to_string_pretty(&session.frame()) {
                Ok(json) => out.extend(json.lines().map(ToString::to_string)),
                Err(error) => out.push(format!("error: {error}")),
            },
            ConsoleCommand::Audit => {
                let audit = session.audit();
                for event in audit.snapshot() {
                    let digest_prefix: String = event.digest.chars().take(12).collect();
                    out.push(format!(
                        "#{} {} {} [{}]",
                        event.seq, event.kind, event.detail, digest_prefix
                    ));
                }
                let chain = match audit.verify_chain() {
                    Ok(()) => "intact".to_string(),
                    Err(broken) => format!("broken at #{}", broken.seq),
                };
                out.push(format!(
                    "{} events, {} unpublished, chain {chain}",
                    audit.len(),
                    audit.unpublished_len()
                ));
            }
            ConsoleCommand::Quit => return ConsoleFlow::Quit,
        }
        ConsoleFlow::Continue
    }
}

fn describe_mode(mode: InteractionMode) -> String {
    match mode {
        InteractionMode::Idle => "mode: idle".to_string(),
        InteractionMode::PlacingPoint => "mode: placing point; click <lat> <lng>".to_string(),
        InteractionMode::PlacingArea { pending_radius_km } => format!(
            "mode: placing area ({pending_radius_km:.2} km); click <lat> <lng>"
        ),
    }
}

fn describe_generation(success: &GenerationSuccess) -> String {
    format!(
        "generated area #{} at {:.5}, {:.5} radius {:.2} km ({}, {:?}); next {:.2} km for {}",
        success.area.generation_number,
        success.area.center.lat,
        success.area.center.lng,
        success.area.radius_km,
        success.price,
        success.grant,
        success.next.radius_km,
        success.next.price
    )
}

fn tokenize_line(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut seen_token_content = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                seen_token_content = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if seen_token_content {
                    tokens.push(std::mem::take(&mut current));
                    seen_token_content = false;
                }
            }
            _ => {
                current.push(ch);
                seen_token_content = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted string".to_string());
    }
    if seen_token_content {
        tokens.push(current);
    }

    Ok(tokens)
}

fn parse_help_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "help")?;
    Ok(ConsoleCommand::Help)
}

fn parse_point_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "point")?;
    Ok(ConsoleCommand::TogglePoint)
}

fn parse_area_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "area")?;
    Ok(ConsoleCommand::ToggleArea)
}

fn parse_click_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "click <lat> <lng>";
    if args.len() != 2 {
        return Err(CommandParseError::new(
            "expected exactly two arguments <lat> <lng>",
            USAGE,
        ));
    }
    Ok(ConsoleCommand::Click {
        at: parse_lat_lng(&args[0], &args[1], USAGE)?,
    })
}

fn parse_save_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    let Some((title, note)) = args.split_first() else {
        return Err(CommandParseError::new(
            "missing required argument <title>",
            "save <title> [note...]",
        ));
    };
    Ok(ConsoleCommand::Save {
        title: title.clone(),
        note: note.join(" "),
    })
}

fn parse_cancel_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "cancel")?;
    Ok(ConsoleCommand::Cancel)
}

fn parse_add_area_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "add_area <lat> <lng> <radius_m> <label...>";
    if args.len() < 4 {
        return Err(CommandParseError::new(
            "expected <lat> <lng> <radius_m> <label...>",
            USAGE,
        ));
    }
    let center = parse_lat_lng(&args[0], &args[1], USAGE)?;
    let radius_m = parse_f64(&args[2], "radius_m", USAGE)?;
    Ok(ConsoleCommand::AddArea {
        center,
        radius_m,
        label: args[3..].join(" "),
    })
}

fn parse_select_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    Ok(ConsoleCommand::Select {
        id: parse_single_id(args, "select <id>")?,
    })
}

fn parse_delete_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    Ok(ConsoleCommand::Delete {
        id: parse_single_id(args, "delete <id>")?,
    })
}

fn parse_confirm_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    Ok(ConsoleCommand::Confirm {
        id: parse_single_id(args, "confirm <id>")?,
    })
}

fn parse_buzz_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "buzz")?;
    Ok(ConsoleCommand::Buzz)
}

fn parse_center_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    const USAGE: &str = "center <lat> <lng>";
    if args.len() != 2 {
        return Err(CommandParseError::new(
            "expected exactly two arguments <lat> <lng>",
            USAGE,
        ));
    }
    Ok(ConsoleCommand::Center {
        at: parse_lat_lng(&args[0], &args[1], USAGE)?,
    })
}

fn parse_refresh_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "refresh")?;
    Ok(ConsoleCommand::Refresh)
}

fn parse_price_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "price")?;
    Ok(ConsoleCommand::Price)
}

fn parse_frame_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "frame")?;
    Ok(ConsoleCommand::Frame)
}

fn parse_audit_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "audit")?;
    Ok(ConsoleCommand::Audit)
}

fn parse_quit_command(args: &[String]) -> Result<ConsoleCommand, CommandParseError> {
    require_no_args(args, "quit")?;
    Ok(ConsoleCommand::Quit)
}

fn parse_single_id(args: &[String], usage: &str) -> Result<RecordId, CommandParseError> {
    if args.len() != 1 {
        return Err(CommandParseError::new(
            "expected exactly one argument <id>",
            usage,
        ));
    }
    RecordId::parse(&args[0]).ok_or_else(|| {
        CommandParseError::new(format!("invalid id '{}' (expected uuid)", args[0]), usage)
    })
}

fn parse_lat_lng(lat: &str, lng: &str, usage: &str) -> Result<LatLng, CommandParseError> {
    Ok(LatLng {
        lat: parse_f64(lat, "lat", usage)?,
        lng: parse_f64(lng, "lng", usage)?,
    })
}

fn parse_f64(raw: &str, name: &str, usage: &str) -> Result<f64, CommandParseError> {
    raw.parse::<f64>().map_err(|_| {
        CommandParseError::new(format!("invalid {name} '{raw}' (expected f64)"), usage)
    })
}

fn require_no_args(args: &[String], usage: &str) -> Result<(), CommandParseError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandParseError::new("this command takes no arguments", usage))
    }
}
