use std::collections::BTreeMap;
use std::env;
use std::process;

use domain::config::DEFAULT_KEY_LENGTH;
use domain::key::derive_key;
use domain::template::{parse_params, substitute, TemplateArgs};
use domain::validate::validate_content;
use domain::{AppCall, BridgeType, LinkContent};

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain params <template>\n  domain key <webUrl> [--ios <url>] [--aos <url>] [--bridge <type>] [--app-call <policy>] [--length <n>]\n  domain expand <template> [segment ...] [--q name=value ...]\n\nNotes:\n  - Offline inspection only; nothing is stored.",
        domain::about()
    );
}

fn flag_value(rest: &[String], i: usize, flag: &str) -> Result<String, String> {
    rest.get(i + 1)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn cmd_params(mut args: impl Iterator<Item = String>) -> Result<(), String> {
    let Some(template) = args.next() else {
        return Err("missing <template> for params".into());
    };
    let params = parse_params(&template);
    let positional: Vec<String> = params.positional.iter().map(|n| format!("${n}")).collect();
    let named: Vec<String> = params.named.iter().map(|n| format!("${n}")).collect();
    println!("positional: {}", positional.join(" "));
    println!("named: {}", named.join(" "));
    Ok(())
}

fn cmd_key(mut args: impl Iterator<Item = String>) -> Result<(), String> {
    let Some(web_url) = args.next() else {
        return Err("missing <webUrl> for key".into());
    };
    let mut content = LinkContent::web_only(web_url);
    let mut length = DEFAULT_KEY_LENGTH;

    let rest: Vec<String> = args.collect();
    let mut i = 0;
    while i < rest.len() {
        let flag = rest[i].as_str();
        let val = flag_value(&rest, i, flag)?;
        match flag {
            "--ios" => content.ios_url = Some(val),
            "--aos" => content.aos_url = Some(val),
            "--bridge" => {
                content.bridge_type =
                    BridgeType::parse(&val).ok_or_else(|| format!("unknown bridge type: {val}"))?
            }
            "--app-call" => {
                content.app_call =
                    AppCall::parse(&val).ok_or_else(|| format!("unknown app call policy: {val}"))?
            }
            "--length" => {
                length = val
                    .parse()
                    .map_err(|_| format!("invalid --length: {val}"))?
            }
            unk => return Err(format!("unknown argument: {unk}")),
        }
        i += 2;
    }

    let content = validate_content(content).map_err(|e| format!("invalid link: {e}"))?;
    println!("{}", derive_key(&content, length));
    Ok(())
}

fn cmd_expand(mut args: impl Iterator<Item = String>) -> Result<(), String> {
    let Some(template) = args.next() else {
        return Err("missing <template> for expand".into());
    };
    let mut path = Vec::new();
    let mut query = BTreeMap::new();

    let rest: Vec<String> = args.collect();
    let mut i = 0;
    while i < rest.len() {
        if rest[i] == "--q" {
            let pair = flag_value(&rest, i, "--q")?;
            let Some((name, value)) = pair.split_once('=') else {
                return Err(format!("--q expects name=value, got: {pair}"));
            };
            query.insert(name.to_string(), value.to_string());
            i += 2;
        } else {
            path.push(rest[i].clone());
            i += 1;
        }
    }

    match substitute(Some(&template), &TemplateArgs::new(path, query)) {
        Ok(Some(url)) => {
            println!("{url}");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(format!("expand failed: {e}")),
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    match cmd.as_str() {
        "params" => cmd_params(args),
        "key" => cmd_key(args),
        "expand" => cmd_expand(args),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn main() {
    if let Err(msg) = run() {
        eprintln!("error: {}", msg);
        process::exit(1);
    }
}
