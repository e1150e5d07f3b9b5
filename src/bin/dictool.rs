//! dictool - inspect and edit dictionary files
//!
//! Encrypted files are unlocked with a passphrase before they are read or
//! edited and stay encrypted when written back.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use dictstore::encoding;
use dictstore::passphrase::{
    CachingPassphraseReader, PassphraseReader, StdinPassphraseReader, TerminalPassphraseReader,
};
use dictstore::{
    DefaultLevel, DictError, Dictionary, ErrorCategory, ErrorKind, Keyring, LoadOptions,
    PassphraseKeySafe, Result, SetFlags,
};
use encoding_rs::Encoding;

#[derive(Parser)]
#[command(name = "dictool")]
#[command(version)]
#[command(about = "Inspect and edit dictionary files.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Encoding of files that do not declare one, and of new files
    #[arg(long, global = true, value_name = "LABEL")]
    encoding: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value of an entry
    Get {
        /// Dictionary file
        file: PathBuf,
        name: String,
    },

    /// Create or overwrite an entry
    Set {
        /// Dictionary file, created if missing
        file: PathBuf,
        name: String,
        value: String,

        /// Keep the entry in plaintext when the file is encrypted
        #[arg(long)]
        dont_encrypt: bool,

        /// Write the entry first and never encrypt it
        #[arg(long)]
        version_spec: bool,
    },

    /// Remove an entry
    Unset {
        /// Dictionary file
        file: PathBuf,
        name: String,

        /// Remove every entry whose name starts with NAME
        #[arg(long)]
        prefix: bool,
    },

    /// Print every entry as name = value
    Dump {
        /// Dictionary file
        file: PathBuf,

        /// Only entries whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Encrypt a file under a new passphrase (re-encrypts if already
    /// encrypted; with --passphrase-stdin the current passphrase comes first)
    Lock {
        /// Dictionary file
        file: PathBuf,
    },

    /// Decrypt a file, writing it back in plaintext
    Unlock {
        /// Dictionary file
        file: PathBuf,
    },
}

struct Session {
    /// The passphrase of the file being edited, asked for at most once.
    passphrase: CachingPassphraseReader,
    /// Asked each time a new key is sealed.
    new_passphrase: Box<dyn PassphraseReader>,
    encoding: Option<&'static Encoding>,
}

impl Session {
    fn new(cli: &Cli) -> Result<Self> {
        let encoding = cli.encoding.as_deref().map(encoding::lookup).transpose()?;
        let (current, new_passphrase): (Box<dyn PassphraseReader>, Box<dyn PassphraseReader>) =
            if cli.passphrase_stdin {
                (
                    Box::new(StdinPassphraseReader::new()),
                    Box::new(StdinPassphraseReader::new()),
                )
            } else {
                (
                    Box::new(TerminalPassphraseReader::new()),
                    Box::new(TerminalPassphraseReader::with_prompt(
                        "New passphrase (dictool): ",
                    )),
                )
            };
        Ok(Self {
            passphrase: CachingPassphraseReader::new(current),
            new_passphrase,
            encoding,
        })
    }

    fn keyring(&mut self) -> Result<Keyring> {
        Keyring::from_reader(&mut self.passphrase)
    }

    fn new_keyring(&mut self) -> Result<Keyring> {
        Keyring::from_reader(self.new_passphrase.as_mut())
    }

    /// Loads `path` (an empty dictionary if it does not exist) and unlocks
    /// it if it is encrypted.
    fn open(&mut self, path: &Path, must_exist: bool) -> Result<Dictionary> {
        let mut dict = Dictionary::with_crypto(Arc::new(PassphraseKeySafe::new()));

        if !must_exist && !path.exists() {
            if let Some(encoding) = self.encoding {
                dict.change_encoding(encoding)?;
            }
            return Ok(dict);
        }

        let opts = LoadOptions {
            default_encoding: self.encoding,
            ..LoadOptions::default()
        };
        match dict.load_file(path, opts) {
            Ok(()) => {}
            Err(e) if e.is(ErrorKind::DuplicateName) => {}
            Err(e) => return Err(e),
        }

        if dict.is_locked() {
            let keyring = self.keyring()?;
            dict.unlock(&keyring, DefaultLevel::NotDefault)?;
        }
        Ok(dict)
    }
}

fn report(dict: &mut Dictionary) {
    for diagnostic in dict.take_diagnostics() {
        eprintln!("warning: {}", diagnostic);
    }
}

fn not_found(name: &str) -> DictError {
    DictError::with_kind(
        ErrorCategory::User,
        ErrorKind::NotFound,
        format!("no entry named '{}'", name),
    )
}

fn run(cli: Cli) -> Result<()> {
    let mut session = Session::new(&cli)?;

    match cli.command {
        Commands::Get { file, name } => {
            let mut dict = session.open(&file, true)?;
            report(&mut dict);
            let value = dict
                .get_as_string_plaintext(&name)
                .ok_or_else(|| not_found(&name))?;
            println!("{}", value);
        }
        Commands::Set {
            file,
            name,
            value,
            dont_encrypt,
            version_spec,
        } => {
            let mut dict = session.open(&file, false)?;
            let flags = SetFlags {
                version_spec,
                dont_encrypt,
            };
            dict.set(&name, value, flags)?;
            dict.write_file(&file)?;
            report(&mut dict);
        }
        Commands::Unset { file, name, prefix } => {
            let mut dict = session.open(&file, true)?;
            let removed = if prefix {
                dict.unset_with_prefix(&name)
            } else {
                usize::from(dict.unset(&name))
            };
            if removed == 0 {
                report(&mut dict);
                return Err(not_found(&name));
            }
            dict.write_file(&file)?;
            report(&mut dict);
        }
        Commands::Dump { file, prefix } => {
            let mut dict = session.open(&file, true)?;
            report(&mut dict);
            let prefix = prefix.unwrap_or_default();
            for name in dict.names_with_prefix_plaintext(&prefix) {
                if let Some(value) = dict.get_as_string_plaintext(&name) {
                    println!("{} = {}", name, value);
                }
            }
        }
        Commands::Lock { file } => {
            let mut dict = session.open(&file, true)?;
            let keyring = session.new_keyring()?;
            dict.rekey(Some(&keyring))?;
            dict.write_file(&file)?;
            report(&mut dict);
        }
        Commands::Unlock { file } => {
            let mut dict = session.open(&file, true)?;
            dict.rekey(None)?;
            dict.write_file(&file)?;
            report(&mut dict);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
