use clap::{Arg, ArgAction, ArgMatches, Command};
use nsapi_client::{Credential, Resource, Shard};

pub fn build_cli() -> Command {
    Command::new("nsapi-client")
        .about("Rate-limit aware NationStates API client")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print a JSON summary instead of the raw body")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("resource")
                .value_parser(["nation", "region", "world", "wa", "cards"])
                .required_unless_present("version")
                .help("API resource to query"),
        )
        .arg(
            Arg::new("target")
                .help("Nation or region name, or WA council (1 or 2)"),
        )
        .arg(
            Arg::new("shard")
                .long("shard")
                .short('s')
                .num_args(1)
                .action(ArgAction::Append)
                .help("Shard to request; repeatable"),
        )
        .arg(
            Arg::new("param")
                .long("param")
                .short('p')
                .num_args(1)
                .action(ArgAction::Append)
                .help("Shard parameter as key=value, attached to the last shard; repeatable"),
        )
        .arg(
            Arg::new("password")
                .long("password")
                .num_args(1)
                .help("Nation password for private shards"),
        )
        .arg(
            Arg::new("autologin")
                .long("autologin")
                .num_args(1)
                .conflicts_with("password")
                .help("Nation autologin token for private shards"),
        )
}

pub fn init_logging(level: Option<&str>) {
    // Explicit level wins over RUST_LOG, which wins over the info default
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(lvl) = level {
        builder.parse_filters(lvl);
    }
    builder.init();
}

/// What the command line asked for.
pub struct Invocation {
    pub resource: Resource,
    pub shards: Vec<Shard>,
    pub credential: Credential,
    pub json: bool,
}

pub fn invocation(matches: &ArgMatches) -> Result<Invocation, String> {
    let resource_name = matches
        .get_one::<String>("resource")
        .ok_or_else(|| "missing resource".to_string())?;
    let target = matches.get_one::<String>("target").cloned();
    let need_target = |what: &str| target.clone().ok_or_else(|| format!("{} requires a target", what));
    let resource = match resource_name.as_str() {
        "nation" => Resource::Nation(need_target("nation")?),
        "region" => Resource::Region(need_target("region")?),
        "wa" => Resource::WorldAssembly(target.clone().unwrap_or_else(|| "1".to_string())),
        "cards" => Resource::Cards { multi: true },
        _ => Resource::World,
    };

    let mut shards: Vec<Shard> = matches
        .get_many::<String>("shard")
        .into_iter()
        .flatten()
        .map(|s| Shard::new(s.as_str()))
        .collect();
    for raw in matches.get_many::<String>("param").into_iter().flatten() {
        let (k, v) = raw
            .split_once('=')
            .ok_or_else(|| format!("parameter {:?} is not key=value", raw))?;
        match shards.last_mut() {
            Some(last) => last.params.push((k.to_string(), v.to_string())),
            None => return Err("--param needs a preceding --shard".to_string()),
        }
    }

    let credential = if let Some(p) = matches.get_one::<String>("password") {
        Credential::Password(p.clone())
    } else if let Some(a) = matches.get_one::<String>("autologin") {
        Credential::Autologin(a.clone())
    } else {
        Credential::None
    };

    Ok(Invocation {
        resource,
        shards,
        credential,
        json: matches.get_flag("json"),
    })
}
