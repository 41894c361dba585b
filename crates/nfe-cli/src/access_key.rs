//! # `nfe access-key`
//!
//! Compose a key from its positional fields, or check and decompose one.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use nfe_core::access_key::random_code;
use nfe_core::{AccessKey, AccessKeyParts, TaxId, Uf};
use serde_json::{json, Value};

#[derive(Args, Debug)]
pub struct AccessKeyArgs {
    #[command(subcommand)]
    pub command: AccessKeyCommand,
}

#[derive(Subcommand, Debug)]
pub enum AccessKeyCommand {
    /// Compose a key and print it.
    Generate(GenerateArgs),
    /// Validate a key and print its fields as JSON.
    Check {
        /// The 44-digit key.
        key: String,
    },
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Jurisdiction, acronym or IBGE code.
    #[arg(long)]
    pub uf: String,
    /// Emission year and month, `YYMM`.
    #[arg(long)]
    pub year_month: String,
    /// Issuer CNPJ or CPF, punctuation allowed.
    #[arg(long)]
    pub tax_id: String,
    #[arg(long, default_value_t = 55)]
    pub model: u8,
    #[arg(long, default_value_t = 1)]
    pub series: u16,
    #[arg(long)]
    pub number: u32,
    #[arg(long, default_value_t = 1)]
    pub emission_type: u8,
    /// Random code (`cNF`); drawn when omitted.
    #[arg(long)]
    pub code: Option<u32>,
}

pub fn run_access_key(args: &AccessKeyArgs) -> Result<u8> {
    match &args.command {
        AccessKeyCommand::Generate(params) => {
            let key = generate(params)?;
            println!("{key}");
            Ok(0)
        }
        AccessKeyCommand::Check { key } => match AccessKey::parse(key) {
            Ok(key) => {
                println!("{}", serde_json::to_string_pretty(&describe(&key))?);
                Ok(0)
            }
            Err(e) => {
                tracing::warn!(key = %key, "invalid access key");
                println!("invalid: {e}");
                Ok(2)
            }
        },
    }
}

pub fn generate(args: &GenerateArgs) -> Result<AccessKey> {
    let uf = Uf::parse(&args.uf).context("invalid --uf")?;
    let tax_id = TaxId::new(&args.tax_id).context("invalid --tax-id")?;
    let parts = AccessKeyParts {
        uf: uf.code(),
        year_month: args.year_month.clone(),
        tax_id: tax_id.padded(),
        model: args.model,
        series: args.series,
        number: args.number,
        emission_type: args.emission_type,
        code: args.code.unwrap_or_else(|| random_code(args.number)),
    };
    Ok(AccessKey::generate(&parts)?)
}

/// The positional fields of `key`.
pub fn describe(key: &AccessKey) -> Value {
    json!({
        "key": key.as_str(),
        "uf": key.uf(),
        "year_month": key.year_month(),
        "tax_id": key.tax_id(),
        "model": key.model(),
        "series": key.series(),
        "number": key.number(),
        "emission_type": key.emission_type(),
        "code": key.code(),
        "check_digit": key.check_digit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> GenerateArgs {
        GenerateArgs {
            uf: "RS".into(),
            year_month: "2602".into(),
            tax_id: "12.345.678/0001-90".into(),
            model: 55,
            series: 1,
            number: 1,
            emission_type: 1,
            code: Some(12_345_678),
        }
    }

    #[test]
    fn generate_with_fixed_code() {
        let key = generate(&args()).unwrap();
        assert_eq!(key.as_str(), "43260212345678000190550010000000011123456789");
    }

    #[test]
    fn generate_draws_code_when_omitted() {
        let key = generate(&GenerateArgs { code: None, ..args() }).unwrap();
        assert_eq!(key.number(), 1);
        assert!(AccessKey::parse(key.as_str()).is_ok());
    }

    #[test]
    fn generate_rejects_bad_uf() {
        let err = generate(&GenerateArgs { uf: "XX".into(), ..args() }).unwrap_err();
        assert!(format!("{err:#}").contains("--uf"));
    }

    #[test]
    fn describe_lists_fields() {
        let key = AccessKey::parse("43260212345678000190550010000000011123456789").unwrap();
        let v = describe(&key);
        assert_eq!(v["uf"], 43);
        assert_eq!(v["tax_id"], "12345678000190");
        assert_eq!(v["code"], 12_345_678);
        assert_eq!(v["check_digit"], 9);
    }

    #[test]
    fn check_exit_codes() {
        let ok = AccessKeyArgs {
            command: AccessKeyCommand::Check {
                key: "43260212345678000190550010000000011123456789".into(),
            },
        };
        assert_eq!(run_access_key(&ok).unwrap(), 0);
        let bad = AccessKeyArgs {
            command: AccessKeyCommand::Check {
                key: "43260212345678000190550010000000011123456780".into(),
            },
        };
        assert_eq!(run_access_key(&bad).unwrap(), 2);
    }
}
