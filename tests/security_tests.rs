//! Integration tests for the security policy
//!
//! Command deny-list, path confinement, filename allow-list and the fixed
//! resource profile.

use reactbox::security::{
    is_allowed_file, resource_profile, sanitize_command, validate_file_path, SecurityError,
    WORKSPACE_ROOT,
};

#[test]
fn test_safe_command_passes_unchanged() {
    for command in ["ls -la", "python3 main.py | tee out.txt", "cd src && cargo test"] {
        assert_eq!(sanitize_command(command).unwrap(), command);
    }
}

#[test]
fn test_chained_destructive_commands_rejected() {
    for command in [
        "ls;rm -rf /",
        "ls; rm -rf /",
        "true&&rm -rf /",
        "cat x|rm -rf /",
        "echo `rm -rf /`",
        "echo $(rm -rf /)",
        "ls;mkfs.ext4 /dev/sda",
        "ls;dd if=/dev/zero of=/dev/sda",
    ] {
        assert!(
            matches!(sanitize_command(command), Err(SecurityError::DangerousCommand { .. })),
            "expected rejection of {command:?}"
        );
    }
}

#[test]
fn test_rejection_is_case_insensitive() {
    assert!(sanitize_command(";RM -RF /").is_err());
    assert!(sanitize_command("ls;Rm -Rf /tmp").is_err());
}

#[test]
fn test_path_confinement() {
    assert!(validate_file_path("/workspace", WORKSPACE_ROOT));
    assert!(validate_file_path("/workspace/src/main.py", WORKSPACE_ROOT));
    assert!(validate_file_path("/workspace/a/../b.py", WORKSPACE_ROOT));

    assert!(!validate_file_path("/workspace/../etc/passwd", WORKSPACE_ROOT));
    assert!(!validate_file_path("/workspace/a/../../etc", WORKSPACE_ROOT));
    assert!(!validate_file_path("/etc/passwd", WORKSPACE_ROOT));
    assert!(!validate_file_path("/workspace2/file.py", WORKSPACE_ROOT));
    assert!(!validate_file_path("main.py", WORKSPACE_ROOT));
    assert!(!validate_file_path("./workspace/main.py", WORKSPACE_ROOT));
}

#[test]
fn test_file_allow_list() {
    for allowed in ["main.py", "App.TSX", "config.yaml", "README.md", "notes.txt", "dir/lib.rs"] {
        assert!(is_allowed_file(allowed), "{allowed} should be allowed");
    }
    for rejected in ["Makefile", "payload.exe", "archive.zip", "lib.so", "image.png", ".bashrc", "trailing."] {
        assert!(!is_allowed_file(rejected), "{rejected} should be rejected");
    }
}

#[test]
fn test_resource_profile_is_locked_down() {
    let profile = resource_profile();
    assert!(!profile.privileged);
    assert_eq!(profile.cap_drop, vec!["ALL"]);
    assert!(profile.cap_add.is_empty());
    assert!(profile.no_new_privileges());
    assert_eq!(profile.memory_bytes, 1024 * 1024 * 1024);
    assert_eq!(profile.memory_swap_bytes, 1024 * 1024 * 1024);
    assert_eq!(profile.cpu_cores(), 0.5);

    let args = profile.container_args();
    assert!(args.contains(&"--cap-drop=ALL".to_string()));
    assert!(args.contains(&"--security-opt=no-new-privileges".to_string()));
    assert!(!args.iter().any(|a| a.starts_with("--cap-add")));
}
