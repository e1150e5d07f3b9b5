//! End-to-end dictionary behavior: round trips, narrowing, encryption
//! masking, and merging.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dictstore::varmor;
use dictstore::{
    CryptoProvider, DATA_ENTRY, DefaultLevel, DictError, Dictionary, ErrorCategory, ErrorKind,
    KEYSAFE_ENTRY, Key, KeySafe, Keyring, Kind, LoadOptions, MacAlgorithm, PassphraseKeySafe,
    Result, SetFlags, Value,
};
use zeroize::Zeroizing;

fn load(text: &[u8]) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.load_from_buffer(text, LoadOptions::default()).unwrap();
    dict
}

fn names(dict: &Dictionary) -> Vec<String> {
    dict.iter(true).map(|e| e.name().to_string()).collect()
}

/// A transparent provider: the "key" is the passphrase, "encryption" XORs
/// with it and appends a checksum byte as the MAC.
#[derive(Default)]
struct MockProvider {
    seals: AtomicUsize,
    decrypts: AtomicUsize,
}

fn xor(key: &[u8], data: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl CryptoProvider for MockProvider {
    fn seal(&self, keyring: &Keyring) -> Result<(Key, KeySafe)> {
        self.seals.fetch_add(1, Ordering::SeqCst);
        let pass = keyring.primary()?.to_vec();
        Ok((Key::from_bytes(pass.clone()), KeySafe::from_bytes(pass)))
    }

    fn unseal(&self, keyring: &Keyring, serialized: &str) -> Result<(Key, KeySafe)> {
        let wanted = serialized.strip_prefix("mock:").unwrap_or_default();
        keyring
            .passphrases()
            .find(|p| *p == wanted.as_bytes())
            .map(|p| (Key::from_bytes(p.to_vec()), KeySafe::from_bytes(p.to_vec())))
            .ok_or_else(|| {
                DictError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::AuthenticationFailed,
                    "mock: no matching passphrase",
                )
            })
    }

    fn encrypt_with_mac(&self, key: &Key, _mac: MacAlgorithm, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = xor(key.as_bytes(), plaintext);
        out.push(checksum(plaintext));
        Ok(out)
    }

    fn decrypt_with_mac(
        &self,
        key: &Key,
        _mac: MacAlgorithm,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypts.fetch_add(1, Ordering::SeqCst);
        let (mac, body) = ciphertext.split_last().ok_or_else(|| {
            DictError::with_kind(ErrorCategory::User, ErrorKind::TruncatedInput, "empty")
        })?;
        let plaintext = xor(key.as_bytes(), body);
        if checksum(&plaintext) != *mac {
            return Err(DictError::with_kind(
                ErrorCategory::User,
                ErrorKind::AuthenticationFailed,
                "mock: bad mac",
            ));
        }
        Ok(Zeroizing::new(plaintext))
    }

    fn export(&self, key_safe: &KeySafe) -> Result<String> {
        Ok(format!(
            "mock:{}",
            String::from_utf8_lossy(key_safe.as_bytes())
        ))
    }
}

fn encrypted_file(provider: Arc<dyn CryptoProvider>) -> Vec<u8> {
    let mut dict = Dictionary::with_crypto(provider);
    dict.set("config.version", 3i32, SetFlags::VERSION_SPEC)
        .unwrap();
    dict.set("public.host", "example.org".to_string(), SetFlags::DONT_ENCRYPT)
        .unwrap();
    dict.set("secret.token", "s3cr3t".to_string(), SetFlags::NONE)
        .unwrap();
    dict.set("secret.port", 8443i32, SetFlags::NONE).unwrap();
    dict.rekey(Some(&Keyring::with_passphrase("pw"))).unwrap();
    dict.write_to_buffer().unwrap()
}

#[test]
fn test_round_trip_identity() {
    let original: &[u8] = b"# Generated settings\n\
        .encoding = \"UTF-8\"\n\
        \n\
        display.width = 1024\n\
        display.name = \"Main |22screen|22\"   # quoted\n\
        feature.enabled = yes\n\
        ratio = 0.75\n";

    let first = load(original);
    let written = first.write_to_buffer().unwrap();
    assert_eq!(written, original);

    let second = load(&written);
    assert_eq!(names(&first), names(&second));
    assert_eq!(first.encoding(), second.encoding());
    for entry in first.iter(true) {
        assert_eq!(
            Some(entry.value()),
            second.entry(entry.name()).map(|e| e.value())
        );
    }
}

#[test]
fn test_round_trip_keeps_late_encoding_declaration() {
    let original: &[u8] = b"a = 1\n.encoding = \"UTF-8\"\nb = 2\n";
    assert_eq!(load(original).write_to_buffer().unwrap(), original);

    let mut dict = load(original);
    dict.set("c", 3i32, SetFlags::NONE).unwrap();
    assert_eq!(
        dict.write_to_buffer().unwrap(),
        b"a = 1\n.encoding = \"UTF-8\"\nb = 2\n\nc = \"3\"\n"
    );
}

#[test]
fn test_round_trip_after_typed_access() {
    let original: &[u8] = b"count = 0x10\nflag = on\n";
    let mut dict = load(original);
    assert_eq!(dict.get("count", 0i32).unwrap(), 16);
    assert!(dict.get("flag", false).unwrap());
    assert_eq!(dict.write_to_buffer().unwrap(), original);
}

#[test]
fn test_narrowing_idempotence() {
    let mut dict = load(b"n = 42\n");
    dict.narrow("n", Kind::Int64).unwrap();
    let once = dict.entry("n").unwrap().value().clone();
    dict.narrow("n", Kind::Int64).unwrap();
    assert_eq!(dict.entry("n").unwrap().value(), &once);
    assert_eq!(once, Value::Int64(42));

    let err = dict.narrow("n", Kind::Double).unwrap_err();
    assert!(err.is(ErrorKind::KindMismatch));
    assert_eq!(dict.entry("n").unwrap().value(), &once);
}

#[test]
fn test_encryption_masking() {
    let provider: Arc<dyn CryptoProvider> = Arc::new(PassphraseKeySafe::with_cost(4));
    let bytes = encrypted_file(provider.clone());

    let mut dict = Dictionary::with_crypto(provider);
    dict.load_from_buffer(&bytes, LoadOptions::default()).unwrap();
    assert!(dict.is_locked());
    assert_eq!(dict.get_as_string("secret.token"), None);
    assert!(names(&dict).iter().all(|n| !n.starts_with("secret.")));
    assert_eq!(dict.get_as_string("public.host"), None);
    assert_eq!(
        dict.get_as_string_plaintext("public.host").as_deref(),
        Some("example.org")
    );

    dict.unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();
    assert_eq!(dict.get_as_string("secret.token").as_deref(), Some("s3cr3t"));
    assert_eq!(dict.get("secret.port", 0i32).unwrap(), 8443);
    assert_eq!(
        dict.get_as_string_plaintext("config.version").as_deref(),
        Some("3")
    );
}

#[test]
fn test_encrypted_file_layout() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], ".encoding = \"UTF-8\"");
    assert_eq!(lines[1], "config.version = \"3\"");
    assert_eq!(lines[2], "public.host = \"example.org\"");
    assert_eq!(lines[3], "encryption.keySafe = \"mock:pw\"");
    assert!(lines[4].starts_with("encryption.data = \""));
    assert_eq!(lines.len(), 5);
    assert!(!text.contains("s3cr3t"));
    assert_eq!(provider.seals.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unlocked_rewrite_round_trips() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());

    let mut dict = Dictionary::with_crypto(provider.clone());
    dict.load_from_buffer(&bytes, LoadOptions::default()).unwrap();
    dict.unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();
    dict.set("secret.token", "rotated".to_string(), SetFlags::NONE)
        .unwrap();
    let rewritten = dict.write_to_buffer().unwrap();

    let mut again = Dictionary::with_crypto(provider.clone());
    again
        .load_from_buffer(&rewritten, LoadOptions::default())
        .unwrap();
    again
        .unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();
    assert_eq!(again.get_as_string("secret.token").as_deref(), Some("rotated"));
    assert_eq!(again.get("secret.port", 0i32).unwrap(), 8443);
    assert_eq!(provider.decrypts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_tampered_payload_keeps_dictionary_locked() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());
    let text = String::from_utf8(bytes).unwrap();
    let tampered = text.replace("encryption.data = \"", "encryption.data = \"AAAA");

    let mut dict = Dictionary::with_crypto(provider);
    dict.load_from_buffer(tampered.as_bytes(), LoadOptions::default())
        .unwrap();
    assert!(
        dict.unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
            .is_err()
    );
    assert!(dict.is_locked());
    assert!(dict.entry_plaintext("encryption.data").is_some());
}

#[test]
fn test_update_never_adds_plaintext_to_encrypted() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());
    let mut old = Dictionary::with_crypto(provider);
    old.load_from_buffer(&bytes, LoadOptions::default()).unwrap();
    old.unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();

    let mut new = Dictionary::new();
    new.set("secret.port", 9000i32, SetFlags::NONE).unwrap();
    new.set("public.host", "evil.example".to_string(), SetFlags::NONE)
        .unwrap();
    new.set("brand.new", "value".to_string(), SetFlags::NONE)
        .unwrap();
    new.set("public.extra", "ok".to_string(), SetFlags::DONT_ENCRYPT)
        .unwrap();

    let first = old.update(&new);
    assert_eq!(first.updated, 1);
    assert_eq!(first.added, 1);
    assert_eq!(first.skipped, 2);
    assert_eq!(old.get("secret.port", 0i32).unwrap(), 9000);
    assert_eq!(
        old.get_as_string_plaintext("public.host").as_deref(),
        Some("example.org")
    );
    assert!(old.entry_plaintext("brand.new").is_none());
    assert!(old.entry_plaintext("public.extra").unwrap().is_dont_encrypt());
    assert!(old.diagnostics().contains("dictionary.updatePlaintext"));
    assert!(old.diagnostics().contains("dictionary.updateRejected"));

    let before = old.write_to_buffer().unwrap().len();
    let second = old.update(&new);
    assert_eq!(second.updated, 0);
    assert_eq!(second.added, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.skipped, 2);
    assert_eq!(old.write_to_buffer().unwrap().len(), before);
}

#[test]
fn test_simple_typed_reads() {
    let mut dict = load(b"foo = 1\nbar = yes\n");
    assert_eq!(dict.get("foo", 0i32).unwrap(), 1);
    assert!(dict.get("bar", false).unwrap());
}

#[test]
fn test_declared_utf8_value() {
    let input = ".encoding = UTF-8\nname = café\n".as_bytes();
    let dict = load(input);
    let name = dict.get_as_string("name").unwrap();
    assert_eq!(name, "café");
    assert_eq!(name.chars().count(), 4);
    assert_eq!(name.len(), 5);
    assert_eq!(dict.write_to_buffer().unwrap(), input);
}

#[test]
fn test_set_then_unset_leaves_nothing() {
    let mut dict = load(b"keep = 1\n");
    dict.set("x", true, SetFlags::NONE).unwrap();
    assert!(dict.unset("x"));
    assert!(!dict.is_defined("x"));
    assert_eq!(dict.write_to_buffer().unwrap(), b"keep = 1\n");

    let mut loaded = load(b"x = 1\nkeep = 1\n");
    loaded.unset("X");
    assert_eq!(loaded.write_to_buffer().unwrap(), b"keep = 1\n");
}

#[test]
fn test_syntax_error_keeps_prior_contents() {
    let mut dict = load(b"before = 1\n");
    let opts = LoadOptions {
        clear: false,
        ..LoadOptions::default()
    };
    let err = dict
        .load_from_buffer(b"after = 2\ngarbage without equals\n", opts)
        .unwrap_err();
    assert!(err.is(ErrorKind::Syntax));
    assert_eq!(names(&dict), vec!["before"]);
    assert_eq!(dict.write_to_buffer().unwrap(), b"before = 1\n");
}

#[test]
fn test_defaults_then_file() {
    let mut dict = Dictionary::new();
    dict.load_from_buffer(b"timeout = 30\nretries = 3\n", LoadOptions::defaults())
        .unwrap();
    dict.load_from_buffer(b"retries = 5\n", LoadOptions::append())
        .unwrap();

    assert_eq!(dict.get("timeout", 0i32).unwrap(), 30);
    assert_eq!(dict.get("retries", 0i32).unwrap(), 5);
    assert_eq!(dict.write_to_buffer().unwrap(), b"retries = 5\n");
}

#[test]
fn test_locked_dictionary_keeps_secrets_out_of_plaintext() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());
    let mut dict = Dictionary::with_crypto(provider.clone());
    dict.load_from_buffer(&bytes, LoadOptions::default()).unwrap();
    assert!(dict.is_locked());

    let err = dict
        .set("password", "hunter2".to_string(), SetFlags::NONE)
        .unwrap_err();
    assert!(err.is(ErrorKind::Locked));
    assert!(dict.entry_plaintext("password").is_none());

    dict.set("public.host", "example.net".to_string(), SetFlags::DONT_ENCRYPT)
        .unwrap();

    dict.load_from_buffer(b"password = hunter2\n", LoadOptions::append())
        .unwrap();
    let err = dict.write_to_buffer().unwrap_err();
    assert!(err.is(ErrorKind::Locked));

    assert!(dict.unset("password"));
    let written = String::from_utf8(dict.write_to_buffer().unwrap()).unwrap();
    assert!(!written.contains("hunter2"));
    assert!(written.contains("public.host = \"example.net\""));

    let mut again = Dictionary::with_crypto(provider);
    again
        .load_from_buffer(written.as_bytes(), LoadOptions::default())
        .unwrap();
    again
        .unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();
    assert_eq!(again.get_as_string("secret.token").as_deref(), Some("s3cr3t"));
    assert_eq!(
        again.get_as_string_plaintext("public.host").as_deref(),
        Some("example.net")
    );
}

#[test]
fn test_key_safe_with_excessive_cost_is_rejected() {
    // cost byte, salt, nonce, zero box length
    let mut sealed = vec![50u8];
    sealed.extend_from_slice(&[0u8; 40]);
    let text = format!(
        "{} = \"{}\"\n{} = \"AAAA\"\n",
        KEYSAFE_ENTRY,
        varmor::wrap(&sealed),
        DATA_ENTRY
    );

    let mut dict = Dictionary::with_crypto(Arc::new(PassphraseKeySafe::new()));
    dict.load_from_buffer(text.as_bytes(), LoadOptions::default())
        .unwrap();
    let err = dict
        .unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap_err();
    assert!(err.is(ErrorKind::ScryptFailure));
    assert!(dict.is_locked());
}

#[test]
fn test_prefix_operations_skip_masked_entries() {
    let provider = Arc::new(MockProvider::default());
    let bytes = encrypted_file(provider.clone());
    let mut dict = Dictionary::with_crypto(provider);
    dict.load_from_buffer(&bytes, LoadOptions::default()).unwrap();
    dict.unlock(&Keyring::with_passphrase("pw"), DefaultLevel::NotDefault)
        .unwrap();

    assert!(dict.names_with_prefix("public.").is_empty());
    assert_eq!(
        dict.names_with_prefix_plaintext("public."),
        vec!["public.host".to_string()]
    );

    assert_eq!(dict.set_all("public.", "example.net".to_string()), 0);
    assert_eq!(dict.unset_with_prefix("public."), 0);
    assert_eq!(
        dict.get_as_string_plaintext("public.host").as_deref(),
        Some("example.org")
    );

    assert_eq!(dict.unset_with_prefix("secret."), 2);
}
