use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use ooxml_crypto::{
    open_decrypted, read_encryption_info, verify_password, DecryptOptions, Dialect,
    EncryptOptions, EncryptionScheme, DEFAULT_PASSWORD,
};

#[derive(Parser)]
#[command(about = "Encrypt, decrypt and inspect password-protected Office documents.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a document package into an OLE container.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        password: PasswordArgs,
        #[arg(long, value_enum, default_value_t = SchemeArg::Agile)]
        scheme: SchemeArg,
        /// Password hash iterations (agile only).
        #[arg(long)]
        spin_count: Option<u32>,
    },
    /// Decrypt an encrypted OLE container back to the document package.
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        password: PasswordArgs,
        /// Skip the agile integrity check.
        #[arg(long)]
        no_verify_integrity: bool,
    },
    /// Exit with status 0 if the password is correct, 1 otherwise.
    Verify {
        input: PathBuf,
        #[command(flatten)]
        password: PasswordArgs,
    },
    /// Print the encryption parameters of a container.
    Info { input: PathBuf },
}

#[derive(Args)]
struct PasswordArgs {
    /// Password (default: the workbook default password).
    #[arg(short, long)]
    password: Option<String>,

    /// Read the password from a file (trailing newlines are trimmed).
    #[arg(long, value_name = "PATH", conflicts_with = "password")]
    password_file: Option<PathBuf>,
}

impl PasswordArgs {
    fn resolve(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(path) = &self.password_file {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read password file {}", path.display()))?;
            return Ok(raw.trim_end_matches(['\r', '\n']).to_string());
        }
        Ok(DEFAULT_PASSWORD.to_string())
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchemeArg {
    Agile,
    Standard,
    CryptoapiRc4,
    Office97Rc4,
}

impl From<SchemeArg> for EncryptionScheme {
    fn from(value: SchemeArg) -> Self {
        match value {
            SchemeArg::Agile => EncryptionScheme::Agile,
            SchemeArg::Standard => EncryptionScheme::Standard,
            SchemeArg::CryptoapiRc4 => EncryptionScheme::CryptoApiRc4,
            SchemeArg::Office97Rc4 => EncryptionScheme::Office97Rc4,
        }
    }
}

fn main() -> Result<ExitCode> {
    match Cli::parse().command {
        Command::Encrypt {
            input,
            output,
            password,
            scheme,
            spin_count,
        } => {
            let mut options = EncryptOptions::for_scheme(scheme.into());
            if let Some(spin_count) = spin_count {
                options = options.with_spin_count(spin_count);
            }
            encrypt(&input, &output, &password.resolve()?, &options)?;
        }
        Command::Decrypt {
            input,
            output,
            password,
            no_verify_integrity,
        } => {
            let options = DecryptOptions {
                verify_integrity: !no_verify_integrity,
                ..DecryptOptions::default()
            };
            decrypt(&input, &output, &password.resolve()?, &options)?;
        }
        Command::Verify { input, password } => {
            let bytes = read_input(&input)?;
            if !verify_password(&bytes, &password.resolve()?) {
                eprintln!("password is incorrect");
                return Ok(ExitCode::FAILURE);
            }
            println!("password is correct");
        }
        Command::Info { input } => info(&input)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read {}", path.display()))
}

fn encrypt(input: &Path, output: &Path, password: &str, options: &EncryptOptions) -> Result<()> {
    let plaintext =
        BufReader::new(File::open(input).with_context(|| format!("open {}", input.display()))?);
    let file = File::create(output).with_context(|| format!("create {}", output.display()))?;
    let mut ole = cfb::CompoundFile::create(file)?;
    ooxml_crypto::encrypt_to_container(plaintext, &mut ole, password, options)
        .with_context(|| format!("encrypt {}", input.display()))?;
    ole.flush()?;
    Ok(())
}

fn decrypt(input: &Path, output: &Path, password: &str, options: &DecryptOptions) -> Result<()> {
    let bytes = read_input(input)?;
    if !ooxml_crypto::is_encrypted_container(&bytes) {
        bail!("{} is not an encrypted Office container", input.display());
    }
    let mut plaintext = open_decrypted(&bytes, password, options)
        .with_context(|| format!("decrypt {}", input.display()))?;
    let mut out = File::create(output).with_context(|| format!("create {}", output.display()))?;
    std::io::copy(&mut plaintext, &mut out)?;
    out.flush()?;
    Ok(())
}

fn info(input: &Path) -> Result<()> {
    let info = read_encryption_info(&read_input(input)?)
        .with_context(|| format!("read EncryptionInfo from {}", input.display()))?;
    let d = &info.descriptor;

    println!("scheme:        {}", info.scheme());
    println!("version:       {}.{}", d.version_major, d.version_minor);
    println!("flags:         {:#06x}", d.flags);
    println!("cipher:        {} ({}-bit, {})", d.cipher, d.key_bits, d.chaining);
    println!("hash:          {}", d.hash);
    println!("spin count:    {}", info.password_spin_count());
    match &info.dialect {
        Dialect::Agile(params) => {
            let p = &params.password;
            println!(
                "key encryptor: {} ({}-bit, {}), {}",
                p.cipher, p.key_bits, p.chaining, p.hash
            );
        }
        Dialect::Standard(provider) => {
            println!("provider:      {} (type {:#x})", provider.csp_name, provider.provider_type);
        }
        Dialect::Office97Rc4 => {}
    }
    Ok(())
}
