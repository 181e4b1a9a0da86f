mod common;

use std::io::Cursor;
use std::ops::ControlFlow;

use media_vault::{UnlockOutcome, Vault, VaultError};
use tempfile::tempdir;

use common::{create_vault, populate, read_all, secret, NEW, OLD};

const PIN: &str = "4711";

#[test]
fn recovery_phrase_is_stable() {
    let dir = tempdir().unwrap();
    let (vault, session, phrase) = create_vault(&dir.path().join("vault"));
    assert_eq!(phrase.words().len(), 24);

    let again = vault.export_recovery_artifact(&session).unwrap();
    assert_eq!(again.expose_phrase(), phrase.expose_phrase());
}

#[test]
fn recover_sets_new_password() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let (vault, session, phrase) = create_vault(&root);
    let files = populate(&vault, &session, 3);
    drop(session);

    // Shouting and extra spaces are tolerated.
    let typed = format!("  {}  ", phrase.expose_phrase().to_uppercase().replace(' ', "   "));
    let recovered = vault.recover(&secret("brand new"), &typed).unwrap();
    for (path, data) in &files {
        assert_eq!(&read_all(&vault, &recovered, path), data);
    }

    drop(vault);
    let vault = Vault::open(&root).unwrap();
    assert!(matches!(vault.unlock(&secret(OLD)), Err(VaultError::Auth)));
    vault.unlock(&secret("brand new")).unwrap();
}

#[test]
fn malformed_phrase_rejected_before_crypto() {
    let dir = tempdir().unwrap();
    let (vault, _session, phrase) = create_vault(&dir.path().join("vault"));

    let short: Vec<&str> = phrase.words().into_iter().take(23).collect();
    assert!(matches!(
        vault.recover(&secret(NEW), &short.join(" ")),
        Err(VaultError::RecoveryFormat(_))
    ));

    let mut words = phrase.words();
    words[5] = "notaword";
    assert!(matches!(
        vault.recover(&secret(NEW), &words.join(" ")),
        Err(VaultError::RecoveryFormat(_))
    ));

    // Swapping two words breaks the checksum (or, rarely, yields a
    // different valid phrase); either way the password stays.
    let mut words = phrase.words();
    words.swap(0, 23);
    assert!(matches!(
        vault.recover(&secret(NEW), &words.join(" ")),
        Err(VaultError::RecoveryFormat(_)) | Err(VaultError::RecoveryMismatch)
    ));
    vault.unlock(&secret(OLD)).unwrap();
}

#[test]
fn phrase_of_another_vault_is_mismatch() {
    let dir = tempdir().unwrap();
    let (vault, _session, _) = create_vault(&dir.path().join("one"));
    let (_other, _other_session, foreign) = create_vault(&dir.path().join("two"));

    assert!(matches!(
        vault.recover(&secret(NEW), foreign.expose_phrase()),
        Err(VaultError::RecoveryMismatch)
    ));
    vault.unlock(&secret(OLD)).unwrap();
}

#[test]
fn phrase_survives_password_change() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let (vault, session, phrase) = create_vault(&root);
    let files = populate(&vault, &session, 2);

    vault
        .change_secret(&secret(OLD), &secret(NEW), |_| ControlFlow::Continue(()))
        .unwrap();
    assert_eq!(
        vault.export_recovery_artifact(&session).unwrap().expose_phrase(),
        phrase.expose_phrase()
    );

    let recovered = vault.recover(&secret("third"), phrase.expose_phrase()).unwrap();
    assert_eq!(read_all(&vault, &recovered, &files[1].0), files[1].1);
    assert!(matches!(vault.unlock(&secret(NEW)), Err(VaultError::Auth)));
}

#[test]
fn recover_locks_previous_sessions() {
    let dir = tempdir().unwrap();
    let (vault, session, phrase) = create_vault(&dir.path().join("vault"));
    let _fresh = vault.recover(&secret(NEW), phrase.expose_phrase()).unwrap();
    assert!(matches!(session.master_key(), Err(VaultError::Locked)));
}

#[test]
fn panic_features_need_a_pin() {
    let dir = tempdir().unwrap();
    let (vault, session, _) = create_vault(&dir.path().join("vault"));

    assert!(matches!(
        vault.enable_panic_wipe(&session, true),
        Err(VaultError::PinNotSet)
    ));
    assert!(matches!(
        vault.enable_disguised_entry(&session, true),
        Err(VaultError::PinNotSet)
    ));
    assert!(matches!(
        vault.set_panic_pin(&session, "12a4"),
        Err(VaultError::InvalidPin(_))
    ));
    assert!(matches!(
        vault.set_panic_pin(&session, "123"),
        Err(VaultError::InvalidPin(_))
    ));

    vault.set_panic_pin(&session, PIN).unwrap();
    assert!(vault.verify_panic_pin(PIN));
    assert!(!vault.verify_panic_pin("4712"));
}

#[test]
fn panic_settings_need_an_unlocked_session() {
    let dir = tempdir().unwrap();
    let (vault, session, _) = create_vault(&dir.path().join("vault"));
    vault.set_panic_pin(&session, PIN).unwrap();
    vault.lock();

    assert!(matches!(vault.set_panic_pin(&session, "9999"), Err(VaultError::Locked)));
    assert!(matches!(
        vault.enable_panic_wipe(&session, true),
        Err(VaultError::Locked)
    ));
    assert!(matches!(
        vault.enable_disguised_entry(&session, true),
        Err(VaultError::Locked)
    ));
    assert!(matches!(vault.clear_panic_pin(&session), Err(VaultError::Locked)));

    // Nothing changed: the PIN is the same and wipe stayed off.
    assert!(vault.verify_panic_pin(PIN));
    assert!(!vault.verify_panic_pin("9999"));
    assert!(matches!(vault.unlock_or_panic(&secret(PIN)), Err(VaultError::Auth)));
    assert!(!vault.reveal_from_disguise(PIN));
}

#[test]
fn panic_pin_wipes_vault() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let (vault, session, _) = create_vault(&root);
    let files = populate(&vault, &session, 3);
    vault.set_panic_pin(&session, PIN).unwrap();
    vault.enable_panic_wipe(&session, true).unwrap();

    // The real password still unlocks normally.
    assert!(matches!(
        vault.unlock_or_panic(&secret(OLD)).unwrap(),
        UnlockOutcome::Unlocked(_)
    ));

    assert!(matches!(
        vault.unlock_or_panic(&secret(PIN)).unwrap(),
        UnlockOutcome::Wiped
    ));
    assert!(matches!(session.master_key(), Err(VaultError::Locked)));
    for (path, _) in &files {
        assert!(!path.exists());
    }
    assert!(matches!(Vault::open(&root), Err(VaultError::VaultNotFound(_))));
}

#[test]
fn pin_without_wipe_is_just_a_wrong_password() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let (vault, session, _) = create_vault(&root);
    populate(&vault, &session, 1);
    vault.set_panic_pin(&session, PIN).unwrap();

    assert!(matches!(vault.unlock_or_panic(&secret(PIN)), Err(VaultError::Auth)));
    assert_eq!(vault.list_files().unwrap().len(), 1);
}

#[test]
fn disguised_entry_reveal() {
    let dir = tempdir().unwrap();
    let (vault, session, _) = create_vault(&dir.path().join("vault"));
    vault.set_panic_pin(&session, PIN).unwrap();
    assert!(!vault.reveal_from_disguise(PIN));

    vault.enable_disguised_entry(&session, true).unwrap();
    assert!(vault.reveal_from_disguise(PIN));
    assert!(!vault.reveal_from_disguise("0000"));

    vault.clear_panic_pin(&session).unwrap();
    assert!(!vault.reveal_from_disguise(PIN));
    assert!(!vault.verify_panic_pin(PIN));
}

#[test]
fn wipe_destroys_everything() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("vault");
    let (vault, session, _) = create_vault(&root);
    populate(&vault, &session, 2);
    vault
        .encrypt(&session, Cursor::new(b"last"), "last.txt", "text/plain")
        .unwrap();

    // Three envelopes plus catalog key, keystore, panic and config files.
    assert_eq!(vault.wipe().unwrap(), 7);
    assert!(!vault.is_unlocked());
    assert!(!root.exists());
}
