use std::net::IpAddr;
use std::path::PathBuf;

use clap::Args;

use common::cert::{CertError, CertRequest, FileError, Ownership};
use common::crypto::{KeySpec, KeyType};
use common::instance_token::InstanceTokenError;

#[derive(Args, Debug, Clone)]
pub struct Cert {
    /// Sign endpoint, e.g. my-cluster/pki/k8s/sign/kubelet
    pub sign_path: String,

    /// Common name of the certificate
    pub common_name: String,

    /// Prefix of the written files (<dest>.pem, <dest>-key.pem, <dest>-ca.pem)
    pub destination: PathBuf,

    /// Bit size of a newly generated key (RSA: 2048 or more, EC: 256 or 384)
    #[arg(short = 'b', long, default_value_t = 2048)]
    pub key_bit_size: usize,

    /// Type of a newly generated key (RSA or EC)
    #[arg(short = 't', long, default_value = "RSA")]
    pub key_type: KeyType,

    /// IP subject alternative names
    #[arg(short = 'i', long, value_delimiter = ',')]
    pub ip_sans: Vec<IpAddr>,

    /// DNS subject alternative names
    #[arg(short = 's', long, value_delimiter = ',')]
    pub san_hosts: Vec<String>,

    /// Owner of written files and directories, by name or uid
    #[arg(short = 'o', long)]
    pub owner: Option<String>,

    /// Group of written files and directories, by name or gid
    #[arg(short = 'g', long)]
    pub group: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CertOpError {
    #[error(transparent)]
    Token(#[from] InstanceTokenError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Cert(#[from] CertError),
}

impl Cert {
    pub fn request(&self) -> Result<CertRequest, CertOpError> {
        Ok(CertRequest {
            sign_path: self.sign_path.clone(),
            common_name: self.common_name.clone(),
            ip_sans: self.ip_sans.clone(),
            san_hosts: self.san_hosts.clone(),
            key_spec: KeySpec {
                key_type: self.key_type,
                bits: self.key_bit_size,
            },
            destination: self.destination.clone(),
            ownership: Ownership::resolve(self.owner.as_deref(), self.group.as_deref())?,
        })
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Cert {
    type Error = CertOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let request = self.request()?;
        ctx.instance_token().current_token(&ctx.backend).await?;
        request.run(&ctx.backend).await?;

        Ok(format!(
            "certificate written to {}",
            request.cert_path().display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        cert: Cert,
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "cert",
            "c1/pki/k8s/sign/kubelet",
            "system:node:n1",
            "/etc/kubernetes/kubelet",
            "-t",
            "ec",
            "-b",
            "384",
            "-i",
            "10.0.0.1,10.0.0.2",
            "-s",
            "n1",
            "-s",
            "n1.local",
            "-o",
            "0",
            "-g",
            "0",
        ]);
        let request = cli.cert.request().unwrap();
        assert_eq!(request.key_spec.key_type, KeyType::Ec);
        assert_eq!(request.key_spec.bits, 384);
        assert_eq!(request.ip_sans.len(), 2);
        assert_eq!(request.san_hosts, vec!["n1", "n1.local"]);
        assert_eq!(request.ownership.uid.as_raw(), 0);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["cert", "p", "cn", "/tmp/x"]);
        assert_eq!(cli.cert.key_type, KeyType::Rsa);
        assert_eq!(cli.cert.key_bit_size, 2048);
        assert!(cli.cert.ip_sans.is_empty());
    }

    #[test]
    fn test_invalid_ip_is_rejected() {
        assert!(Cli::try_parse_from(["cert", "p", "cn", "/tmp/x", "-i", "not-an-ip"]).is_err());
    }
}
