use std::path::PathBuf;

fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = snapbridge::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut args = std::env::args().skip(1).peekable();
    let mut saw_flag = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("SnapBridge {}", snapbridge::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "SnapBridge: a terminal video feed with local uploads and sample lessons.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --export [DIR]       Write snapbridge_feed.json and exit"
                );
                saw_flag = true;
            }
            "--export" => {
                saw_flag = true;
                let dir = args
                    .next_if(|next| !next.starts_with('-'))
                    .map(PathBuf::from);
                match snapbridge::export_once(dir.as_deref()) {
                    Ok(path) => println!("Exported feed to {}", path.display()),
                    Err(err) => {
                        eprintln!("Export failed: {err:?}");
                        std::process::exit(1);
                    }
                }
            }
            _ => {}
        }
    }
    saw_flag
}
