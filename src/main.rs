mod cli;

use log::{debug, error};
use nsapi_client::{Config, Credential, NsClient};
use serde::Serialize;

#[derive(Serialize)]
struct Summary<'a> {
    status: u16,
    server_usage: Option<u32>,
    local_estimate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_state: Option<nsapi_client::AuthState>,
    body: &'a str,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::build_cli();
    let matches = cmd.get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();
    let version_flag = matches.get_flag("version");

    cli::init_logging(log_level.as_deref());

    if version_flag {
        println!("nsapi-client {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let inv = cli::invocation(&matches).map_err(anyhow::Error::msg)?;
    let cfg = Config::from_env().map_err(anyhow::Error::msg)?;
    debug!("api_url={} version={}", cfg.api_url, cfg.api_version);
    let client = NsClient::from_config(&cfg)?;

    let (result, auth_state) = match (&inv.resource, &inv.credential) {
        (nsapi_client::Resource::Nation(name), cred) if *cred != Credential::None => {
            let nation = client.private_nation(name.clone(), cred.clone());
            let res = nation.request(&inv.shards).await;
            (res, Some(nation.auth_state().await))
        }
        _ => (client.request(&inv.resource, &inv.shards).await, None),
    };

    let response = match result {
        Ok(r) => r,
        Err(e) => {
            error!("request failed ({}): {}", e.code(), e);
            return Err(e.into());
        }
    };

    if inv.json {
        let summary = Summary {
            status: response.status.as_u16(),
            server_usage: client.server_usage(),
            local_estimate: client.tracker().estimate_usage(),
            auth_state,
            body: &response.body,
        };
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        println!("{}", response.body);
    }
    Ok(())
}
