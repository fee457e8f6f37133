mod backup;
mod db;
mod ipc;
mod schedule;

use std::io::{self, BufRead, Write};

/// Sidecar protocol: one JSON request per stdin line, one JSON response
/// per stdout line. stdout carries nothing else, so failures travel
/// in-band as error responses.
fn serve(state: &mut ipc::AppState) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back; emit a bare protocol error and move on.
                writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                )?;
                stdout.flush()?;
                continue;
            }
        };

        let resp = ipc::handle_request(state, req);
        let text =
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        writeln!(stdout, "{}", text)?;
        stdout.flush()?;
    }

    Ok(())
}

fn main() {
    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };
    // A broken stdio pipe just means the shell went away.
    let _ = serve(&mut state);
}
