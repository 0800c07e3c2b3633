//! migp-server implements a MIGP server. It supports encrypting and
//! loading a database of breach entries into buckets, and serving
//! those buckets to clients via the MIGP protocol.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;

use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use clap::{App as CliApp, Arg};

use migp::{BucketStore, ClientRequest, MigpError, Server, ServerConfig};

const STORE_DIR: &str = "./store";

struct ServerState {
  server: Server,
  store: BucketStore,
}

#[actix_web::main]
async fn main() -> io::Result<()> {
  let matches = CliApp::new("migp-server")
    .version("0.1.0")
    .about("MIGP server: insert breach credentials and answer evaluate queries")
    .arg(
      Arg::with_name("config")
        .long("config")
        .takes_value(true)
        .default_value("")
        .help("Server configuration file"),
    )
    .arg(
      Arg::with_name("listen")
        .long("listen")
        .takes_value(true)
        .default_value("localhost:8080")
        .help("Server listen address"),
    )
    .arg(
      Arg::with_name("dump-config")
        .long("dump-config")
        .help("Dump the server configuration to stdout and exit"),
    )
    .arg(
      Arg::with_name("infile")
        .long("infile")
        .takes_value(true)
        .default_value("-")
        .help("Input file of credentials to insert in the format <username>:<password> ('-' for stdin)"),
    )
    .arg(
      Arg::with_name("indir")
        .long("indir")
        .takes_value(true)
        .default_value("")
        .help("Input directory of credential files to insert"),
    )
    .arg(
      Arg::with_name("metadata")
        .long("metadata")
        .takes_value(true)
        .default_value("")
        .help("Optional metadata string to store alongside breach entries"),
    )
    .arg(
      Arg::with_name("num-variants")
        .long("num-variants")
        .takes_value(true)
        .default_value("9")
        .help("Number of password variants to include"),
    )
    .arg(
      Arg::with_name("username-variant")
        .long("username-variant")
        .takes_value(true)
        .default_value("true")
        .help("Include a username-only variant"),
    )
    .arg(
      Arg::with_name("start")
        .long("start")
        .help("Start the MIGP server without loading a breach dataset"),
    )
    .arg(
      Arg::with_name("test")
        .long("test")
        .help("Report bucket statistics before serving"),
    )
    .get_matches();

  let config_file = matches.value_of("config").unwrap();
  let cfg = if config_file.is_empty() {
    ServerConfig::default()
  } else {
    match load_config(config_file) {
      Ok(cfg) => cfg,
      Err(e) => fatal(&format!("error reading config file {}: {}", config_file, e)),
    }
  };

  if matches.is_present("dump-config") {
    match serde_json::to_string(&cfg) {
      Ok(json) => println!("{}", json),
      Err(e) => fatal(&format!("error encoding config: {}", e)),
    }
    return Ok(());
  }

  let server = match Server::new(&cfg) {
    Ok(server) => server,
    Err(e) => fatal(&format!("error initializing server: {}", e)),
  };
  let store = BucketStore::new(STORE_DIR);
  let listen = matches.value_of("listen").unwrap().to_string();

  if matches.is_present("start") {
    return serve(&listen, server, store).await;
  }

  if matches.is_present("test") {
    match report_bucket_stats(STORE_DIR) {
      Ok(()) => {}
      Err(e) => fatal(&format!("error reading bucket store: {}", e)),
    }
    return serve(&listen, server, store).await;
  }

  // insertion mode: encrypt the input credentials, flush the store and
  // exit; a later --start run serves the result
  let metadata = matches.value_of("metadata").unwrap().as_bytes().to_vec();
  let num_variants: usize = match matches.value_of("num-variants").unwrap().parse() {
    Ok(n) => n,
    Err(e) => fatal(&format!("invalid --num-variants: {}", e)),
  };
  let include_username_variant: bool =
    match matches.value_of("username-variant").unwrap().parse() {
      Ok(b) => b,
      Err(e) => fatal(&format!("invalid --username-variant: {}", e)),
    };

  let indir = matches.value_of("indir").unwrap();
  let infile = matches.value_of("infile").unwrap();

  let (successes, failures) = if !indir.is_empty() {
    let mut successes = 0;
    let mut failures = 0;
    let files = match credential_files(Path::new(indir)) {
      Ok(files) => files,
      Err(e) => fatal(&format!("error walking {}: {}", indir, e)),
    };
    for file in files {
      println!("> Inserting credentials from {}", file.display());
      let reader = match fs::File::open(&file) {
        Ok(f) => BufReader::new(f),
        Err(e) => fatal(&format!("error opening {}: {}", file.display(), e)),
      };
      let (s, f) = process_credentials(
        &server,
        &store,
        reader,
        &metadata,
        num_variants,
        include_username_variant,
      );
      successes += s;
      failures += f;
    }
    (successes, failures)
  } else if infile == "-" {
    let stdin = io::stdin();
    let reader = stdin.lock();
    process_credentials(
      &server,
      &store,
      reader,
      &metadata,
      num_variants,
      include_username_variant,
    )
  } else {
    let reader = match fs::File::open(infile) {
      Ok(f) => BufReader::new(f),
      Err(e) => fatal(&format!("error opening {}: {}", infile, e)),
    };
    process_credentials(
      &server,
      &store,
      reader,
      &metadata,
      num_variants,
      include_username_variant,
    )
  };

  println!(
    "> Encrypted breach entries: {} successes, {} failures",
    successes, failures
  );
  if let Err(e) = store.save() {
    fatal(&format!("error saving bucket store: {}", e));
  }
  for (id, size) in store.bucket_sizes() {
    println!("> Bucket {}: {} bytes", id, size);
  }
  Ok(())
}

fn fatal(msg: &str) -> ! {
  eprintln!("{}", msg);
  process::exit(1);
}

fn load_config(path: &str) -> Result<ServerConfig, MigpError> {
  let data = fs::read_to_string(path)?;
  serde_json::from_str(&data)
    .map_err(|e| MigpError::Config(format!("malformed config file: {}", e)))
}

/// Reads `<username>:<password>` lines and inserts each into the
/// store. Lines without a separator count as failures and are skipped.
fn process_credentials<R: BufRead>(
  server: &Server,
  store: &BucketStore,
  input: R,
  metadata: &[u8],
  num_variants: usize,
  include_username_variant: bool,
) -> (usize, usize) {
  let mut successes = 0;
  let mut failures = 0;
  for line in input.lines() {
    let line = match line {
      Ok(line) => line,
      Err(_) => {
        failures += 1;
        continue;
      }
    };
    if line.is_empty() {
      continue;
    }
    let mut fields = line.splitn(2, ':');
    let username = fields.next().unwrap_or("");
    let password = match fields.next() {
      Some(password) => password,
      None => {
        failures += 1;
        continue;
      }
    };
    match server.insert(
      store,
      username.as_bytes(),
      password.as_bytes(),
      metadata,
      num_variants,
      include_username_variant,
    ) {
      Ok(()) => successes += 1,
      Err(_) => failures += 1,
    }
  }
  (successes, failures)
}

/// Collects the regular files under `dir` recursively, skipping
/// dotfiles.
fn credential_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let name = entry.file_name();
    if name.to_string_lossy().starts_with('.') {
      continue;
    }
    let path = entry.path();
    if path.is_dir() {
      files.extend(credential_files(&path)?);
    } else {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// Walks the on-disk store and prints bucket count, credential volume
/// and the spread of bucket sizes.
fn report_bucket_stats(root: &str) -> io::Result<()> {
  let mut sizes: Vec<u64> = Vec::new();
  if Path::new(root).is_dir() {
    collect_bucket_sizes(Path::new(root), &mut sizes)?;
  }
  if sizes.is_empty() {
    println!("> No buckets in {}", root);
    return Ok(());
  }
  let total: u64 = sizes.iter().sum();
  let mean = total as f64 / sizes.len() as f64;
  let variance = sizes
    .iter()
    .map(|&s| {
      let d = s as f64 - mean;
      d * d
    })
    .sum::<f64>()
    / sizes.len() as f64;
  println!("> Buckets: {}", sizes.len());
  println!("> Total size: {} bytes", total);
  println!("> Mean bucket size: {:.1} bytes", mean);
  println!("> Std dev: {:.1} bytes", variance.sqrt());
  Ok(())
}

fn collect_bucket_sizes(dir: &Path, sizes: &mut Vec<u64>) -> io::Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    if entry.file_name().to_string_lossy().starts_with('.') {
      continue;
    }
    let path = entry.path();
    if path.is_dir() {
      collect_bucket_sizes(&path, sizes)?;
    } else {
      sizes.push(entry.metadata()?.len());
    }
  }
  Ok(())
}

async fn serve(listen: &str, server: Server, store: BucketStore) -> io::Result<()> {
  println!("> Starting MIGP server on {}", listen);
  let state = web::Data::new(ServerState { server, store });
  HttpServer::new(move || {
    App::new()
      .app_data(state.clone())
      .wrap(Cors::permissive())
      .service(config_endpoint)
      .service(evaluate)
  })
  .bind(listen)?
  .run()
  .await
}

#[get("/config")]
async fn config_endpoint(state: web::Data<ServerState>) -> HttpResponse {
  HttpResponse::Ok().json(state.server.config())
}

#[post("/evaluate")]
async fn evaluate(body: String, state: web::Data<ServerState>) -> HttpResponse {
  let request: ClientRequest = match serde_json::from_str(&body) {
    Ok(request) => request,
    Err(_) => return HttpResponse::BadRequest().finish(),
  };
  // internal error detail stays off the wire
  match state.server.handle_evaluate(&request, &state.store) {
    Ok(response) => match response.to_bytes() {
      Ok(bytes) => HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(bytes),
      Err(_) => HttpResponse::InternalServerError().finish(),
    },
    Err(MigpError::VersionMismatch { .. }) | Err(MigpError::Framing(_)) | Err(MigpError::Oprf(_)) => {
      HttpResponse::BadRequest().finish()
    }
    Err(_) => HttpResponse::InternalServerError().finish(),
  }
}
