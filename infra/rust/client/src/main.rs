//! migp-client implements the client-side logic: retrieve the server
//! configuration, query credentials against the MIGP server, and
//! decrypt the bucket responses.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::process;

use clap::{App, Arg};
use serde::Serialize;

use migp::{Client, ClientRequest, Config, MigpError, ServerResponse};

#[derive(Serialize)]
struct QueryOutput<'a> {
  username: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  password: Option<&'a str>,
  status: &'static str,
  #[serde(skip_serializing_if = "String::is_empty")]
  metadata: String,
}

fn main() {
  let matches = App::new("migp-client")
    .version("0.1.0")
    .about("MIGP client: check credentials against a MIGP server")
    .arg(
      Arg::with_name("config")
        .long("config")
        .takes_value(true)
        .default_value("")
        .help("Client configuration file (default: retrieve from server)"),
    )
    .arg(
      Arg::with_name("target")
        .long("target")
        .takes_value(true)
        .default_value("http://localhost:8080")
        .help("Target MIGP server"),
    )
    .arg(
      Arg::with_name("infile")
        .long("infile")
        .takes_value(true)
        .default_value("-")
        .help("Input file of credentials to query in the format <username>:<password> ('-' for stdin)"),
    )
    .arg(
      Arg::with_name("show-password")
        .long("show-password")
        .help("Show the password in the output"),
    )
    .arg(
      Arg::with_name("dump-config")
        .long("dump-config")
        .help("Dump the client configuration to stdout and exit"),
    )
    .get_matches();

  let target = matches.value_of("target").unwrap().to_string();
  let config_file = matches.value_of("config").unwrap();
  let show_password = matches.is_present("show-password");

  let cfg: Config = if config_file.is_empty() {
    fetch_config(&target)
  } else {
    let data = match fs::read_to_string(config_file) {
      Ok(data) => data,
      Err(e) => fatal(&format!("error reading config file {}: {}", config_file, e)),
    };
    match serde_json::from_str(&data) {
      Ok(cfg) => cfg,
      Err(e) => fatal(&format!("malformed config file {}: {}", config_file, e)),
    }
  };

  if matches.is_present("dump-config") {
    match serde_json::to_string(&cfg) {
      Ok(json) => println!("{}", json),
      Err(e) => fatal(&format!("error encoding config: {}", e)),
    }
    return;
  }

  if cfg.version != migp::DEFAULT_VERSION {
    eprintln!(
      "WARN: this MIGP library speaks version {} but the config specifies {}; they may not be compatible",
      migp::DEFAULT_VERSION,
      cfg.version
    );
  }

  let client = match Client::new(&cfg) {
    Ok(client) => client,
    Err(e) => fatal(&format!("error initializing client: {}", e)),
  };
  let http = reqwest::blocking::Client::new();
  let evaluate_url = format!("{}/evaluate", target);

  let infile = matches.value_of("infile").unwrap();
  let stdin = io::stdin();
  let reader: Box<dyn BufRead> = if infile == "-" {
    Box::new(stdin.lock())
  } else {
    match fs::File::open(infile) {
      Ok(f) => Box::new(BufReader::new(f)),
      Err(e) => fatal(&format!("error opening {}: {}", infile, e)),
    }
  };

  for line in reader.lines() {
    let line = match line {
      Ok(line) => line,
      Err(e) => fatal(&format!("error reading input: {}", e)),
    };
    if line.is_empty() {
      continue;
    }
    let mut fields = line.splitn(2, ':');
    let username = fields.next().unwrap_or("");
    let password = match fields.next() {
      Some(password) => password,
      None => continue,
    };

    let result = migp::query(
      &client,
      username.as_bytes(),
      password.as_bytes(),
      |request| post_evaluate(&http, &evaluate_url, request),
    );
    let (status, metadata) = match result {
      Ok(result) => result,
      Err(e) => fatal(&e.to_string()),
    };

    let output = QueryOutput {
      username,
      password: if show_password { Some(password) } else { None },
      status: status.as_str(),
      metadata: String::from_utf8_lossy(&metadata).into_owned(),
    };
    match serde_json::to_string(&output) {
      Ok(json) => println!("{}", json),
      Err(e) => fatal(&format!("error encoding result: {}", e)),
    }
  }
}

fn fatal(msg: &str) -> ! {
  eprintln!("{}", msg);
  process::exit(1);
}

fn fetch_config(target: &str) -> Config {
  let response = match reqwest::blocking::get(format!("{}/config", target)) {
    Ok(response) => response,
    Err(e) => fatal(&format!("unable to reach MIGP target {}: {}", target, e)),
  };
  if response.status() != reqwest::StatusCode::OK {
    fatal(&format!(
      "unable to retrieve MIGP config from target {}: status code {}",
      target,
      response.status().as_u16()
    ));
  }
  match response.json() {
    Ok(cfg) => cfg,
    Err(e) => fatal(&format!("malformed config from target {}: {}", target, e)),
  }
}

fn post_evaluate(
  http: &reqwest::blocking::Client,
  url: &str,
  request: &ClientRequest,
) -> Result<ServerResponse, MigpError> {
  let body = serde_json::to_string(request)
    .map_err(|e| MigpError::Transport(format!("failed to encode request: {}", e)))?;
  let response = http
    .post(url)
    .header("Content-Type", "application/json")
    .body(body)
    .send()
    .map_err(|e| MigpError::Transport(e.to_string()))?;
  if response.status() != reqwest::StatusCode::OK {
    return Err(MigpError::Transport(format!(
      "request failed with status code {}",
      response.status().as_u16()
    )));
  }
  let bytes = response
    .bytes()
    .map_err(|e| MigpError::Transport(e.to_string()))?;
  ServerResponse::from_bytes(&bytes)
}
