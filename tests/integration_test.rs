use bytepatch::descriptor::checksum_bytes;
use bytepatch::{manifest, Applied, ApplyError, ApplyFlags, PatchEngine};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const BASE: u64 = 0x140000000;

fn bytepatch_exe() -> &'static str {
    env!("CARGO_BIN_EXE_bytepatch")
}

/// 4 KiB of pseudo-random bytes standing in for the game executable.
fn pristine_exe() -> Vec<u8> {
    let mut state = 0x2545F491u32;
    (0..4096)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

const OFFSETS: [usize; 3] = [0x0100, 0x0101, 0x0F00];

fn patched_byte(b: u8) -> u8 {
    b.wrapping_add(0x41)
}

fn patched_exe() -> Vec<u8> {
    let mut data = pristine_exe();
    for off in OFFSETS {
        data[off] = patched_byte(data[off]);
    }
    data
}

fn patch_1337() -> String {
    let pristine = pristine_exe();
    let mut text = String::from(">Game.exe\n");
    for off in OFFSETS {
        let b = pristine[off];
        text.push_str(&format!("{:X}:{:02X}->{:02X}\n", BASE + off as u64, b, patched_byte(b)));
    }
    text
}

/// Lay out `root/install/bin/Game.exe` plus `root/patch.toml` and `root/fix.1337`.
fn setup(root: &Path, exe: &[u8]) {
    fs::create_dir_all(root.join("install/bin")).unwrap();
    fs::write(root.join("install/bin/Game.exe"), exe).unwrap();
    fs::write(root.join("fix.1337"), patch_1337()).unwrap();
    fs::write(
        root.join("patch.toml"),
        format!(
            "path = \"bin/Game.exe\"\nchecksum = \"{}\"\nbase_offset = {BASE:#x}\nedits_file = \"fix.1337\"\n",
            hex::encode(checksum_bytes(&pristine_exe()))
        ),
    )
    .unwrap();
}

fn run(root: &Path, args: &[&str]) -> Output {
    let manifest = root.join("patch.toml");
    let dir = root.join("install");
    Command::new(bytepatch_exe())
        .args(args)
        .args(["--manifest", manifest.to_str().unwrap(), "--dir", dir.to_str().unwrap()])
        .output()
        .expect("Failed to run bytepatch")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn exe_bytes(root: &Path) -> Vec<u8> {
    fs::read(root.join("install/bin/Game.exe")).unwrap()
}

#[test]
fn test_end_to_end_backup_apply_restore() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    setup(root, &pristine_exe());

    // Step 1: status reports a clean file and no backup
    let output = run(root, &["status"]);
    assert!(output.status.success(), "status failed: {}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.contains("File: bin/Game.exe"), "{text}");
    assert!(text.contains("Unmodified file detected."), "{text}");
    assert!(text.contains("No backup available."), "{text}");
    assert_eq!(exe_bytes(root), pristine_exe());

    // Step 2: apply with an automatic backup
    let output = run(root, &["apply", "--backup"]);
    assert!(output.status.success(), "apply failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Patch installed successfully. Success."));
    assert_eq!(exe_bytes(root), patched_exe());
    assert_eq!(
        fs::read(root.join("install/bin/Game_backup.exe")).unwrap(),
        pristine_exe()
    );

    // Step 3: a second apply is refused as already installed
    let output = run(root, &["apply"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Patch is already installed."));
    assert!(stdout(&run(root, &["status"])).contains("The patch is already installed."));

    // Step 4: restore brings the pristine bytes back
    let output = run(root, &["restore"]);
    assert!(output.status.success(), "restore failed: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(exe_bytes(root), pristine_exe());
}

#[test]
fn test_incompatible_file_needs_force() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let mut exe = pristine_exe();
    exe[OFFSETS[0]] = patched_byte(exe[OFFSETS[0]]);
    exe[OFFSETS[1]] = exe[OFFSETS[1]].wrapping_add(1);
    setup(root, &exe);

    assert!(stdout(&run(root, &["status"])).contains("incompatible file detected"));

    let output = run(root, &["apply"]);
    assert!(!output.status.success());
    assert_eq!(exe_bytes(root), exe);

    let output = run(root, &["apply", "--force"]);
    assert!(output.status.success(), "forced apply failed: {}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Success. (Patch applied to modified target file)"));
    assert_eq!(exe_bytes(root), patched_exe());
}

#[test]
fn test_dry_run_and_wrong_size() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    setup(root, &pristine_exe());

    let output = run(root, &["apply", "--dry-run", "--backup"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Dry run: Success."));
    assert_eq!(exe_bytes(root), pristine_exe());
    assert!(!root.join("install/bin/Game_backup.exe").exists());

    // truncate below the highest edit offset: not forceable
    fs::write(root.join("install/bin/Game.exe"), &pristine_exe()[..0x0F00]).unwrap();
    let output = run(root, &["apply", "--force"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr)
        .contains("Target file is not compatible with this patch."));
}

#[test]
fn test_backup_twice_fails() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    setup(root, &pristine_exe());

    assert!(run(root, &["backup"]).status.success());
    fs::write(root.join("install/bin/Game.exe"), b"overwritten").unwrap();
    assert!(!run(root, &["backup"]).status.success());
    assert_eq!(
        fs::read(root.join("install/bin/Game_backup.exe")).unwrap(),
        pristine_exe()
    );
}

#[test]
fn test_library_api_with_loaded_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let mut exe = pristine_exe();
    exe[0x10] ^= 0xFF; // drift outside of the edit offsets
    setup(root, &exe);

    let descriptor = manifest::load(&root.join("patch.toml")).unwrap();
    assert_eq!(descriptor.edits().len(), OFFSETS.len());
    assert_eq!(descriptor.edits()[2].offset, 0x0F00);

    let engine = PatchEngine::new(&descriptor);
    let dir = root.join("install");
    assert_eq!(engine.scan(&dir).unwrap(), Applied::SuccessModified);
    assert_eq!(
        engine.apply(&dir, ApplyFlags::default()).unwrap(),
        Applied::SuccessModified
    );
    assert!(matches!(
        engine.apply(&dir, ApplyFlags::default().force(true)),
        Err(ApplyError::AlreadyInstalled)
    ));

    assert!(matches!(
        engine.apply(&root.join("elsewhere"), ApplyFlags::default()),
        Err(ApplyError::FileNotFound { .. })
    ));
}
