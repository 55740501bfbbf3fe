//! Shell scripts standing in for `kubectl`, so the real process transport
//! and pod watcher can be driven end to end in tests.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT: AtomicUsize = AtomicUsize::new(0);

/// A private scratch directory for one test
pub fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cptx-bootstrap-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write `body` as an executable `/bin/sh` script and return its path
pub fn write_script(body: &str) -> PathBuf {
    let path = scratch_dir().join("kubectl");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A Junos-like CLI behind `kubectl exec -it`.
///
/// Like kubectl with a TTY it puts its terminal in raw mode, and like the
/// remote CLI it echoes every line it reads. It prints a login banner
/// prompt and then stays quiet for a moment before taking input. Every
/// `commit` is answered with `commit_reply`, which must not contain `'`.
pub fn junos_cli(commit_reply: &str) -> PathBuf {
    write_script(&format!(
        r#"stty raw -echo 2>/dev/null
EOT=$(printf '\004')
printf 'Last login: never\n\nroot@r1> '
sleep 0.3
while IFS= read -r line; do
  printf '%s\n' "$line"
  case "$line" in
    load*)
      printf '[Type ^D at a new line to end input]\n'
      while IFS= read -r body; do
        [ "$body" = "$EOT" ] && break
        printf '%s\n' "$body"
      done
      printf 'load complete\n' ;;
    commit*) printf '%s\n' '{commit_reply}' ;;
    configure) printf 'Entering configuration mode\n' ;;
    "exit configuration-mode") printf 'Exiting configuration mode\n' ;;
    *) printf 'out-of[%s]\n' "$line" ;;
  esac
  printf '\nroot@r1> '
done
"#
    ))
}
