use crate::cli::args::{CliArgs, Command};

pub fn validate(args: &CliArgs) -> Result<(), String> {
    if let Some(timeout) = args.timeout {
        if timeout == 0 {
            return Err("invalid timeout, expected a positive number of seconds".to_string());
        }
    }
    if let Some(raw) = args.base_url.as_deref() {
        validate_base_url(raw).map_err(|e| format!("invalid --base-url '{raw}': {e}"))?;
    }
    if let Some(proxy) = args.proxy.as_deref() {
        if proxy.trim().is_empty() {
            return Err("invalid --proxy, expected a URL".to_string());
        }
    }

    match &args.command {
        Command::List(list) => {
            if list.page == 0 {
                return Err("invalid page, pages start at 1".to_string());
            }
            if list.page_size == Some(0) {
                return Err("invalid page-size, expected positive integer".to_string());
            }
            if let Some(raw) = list.select.as_deref() {
                let ids = crate::utils::parse_id_csv(raw)
                    .map_err(|e| format!("invalid --select '{raw}': {e}"))?;
                if ids.len() > 2 {
                    return Err(format!(
                        "invalid --select '{raw}': at most two records can be compared"
                    ));
                }
            }
        }
        Command::Delete(delete) => {
            if let Some(raw) = delete.ids.as_deref() {
                crate::utils::parse_id_csv(raw).map_err(|e| format!("invalid --id '{raw}': {e}"))?;
            }
        }
        Command::Print(print) => {
            if let Some(raw) = print.ids.as_deref() {
                crate::utils::parse_id_csv(raw).map_err(|e| format!("invalid --id '{raw}': {e}"))?;
            }
        }
        _ => {}
    }
    Ok(())
}

pub fn validate_base_url(raw: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme '{other}'")),
    }
}
