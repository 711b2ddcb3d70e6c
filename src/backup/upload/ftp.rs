use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::upload::UploadTarget;
use bon::Builder;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::io::BufReader;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use validator::Validate;

fn default_port() -> u16 {
    21
}

/// Configuration for a plain FTP upload
///
/// The archive is stored under its own file name, inside `cwd` when one is
/// given. `timeout` bounds connecting as well as every read and write on the
/// control connection.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct FtpTarget {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    #[builder(default = default_port())]
    port: u16,
    #[validate(length(min = 1))]
    #[builder(into)]
    user: String,
    #[builder(into)]
    password: RedactedString,
    #[builder(into)]
    cwd: Option<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl FtpTarget {
    #[named]
    fn connect(&self) -> Result<FtpStream> {
        self.open_stream()
            .add_msg(format!("Connecting to {}:{} failed", self.host, self.port))
            .add_fn_name(function_path!())
    }

    fn open_stream(&self) -> Result<FtpStream> {
        let stream = match self.timeout {
            None => FtpStream::connect((self.host.as_str(), self.port))?,
            Some(timeout) => {
                let addr = (self.host.as_str(), self.port)
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| {
                        Error::invalid_config(format!("{} has no address", self.host))
                    })?;
                let stream = FtpStream::connect_timeout(addr, timeout)?;
                stream.get_ref().set_read_timeout(Some(timeout))?;
                stream.get_ref().set_write_timeout(Some(timeout))?;
                stream
            }
        };
        Ok(stream)
    }
}

impl UploadTarget for FtpTarget {
    fn identity(&self) -> String {
        match &self.cwd {
            Some(cwd) => format!("ftp://{}@{}:{}/{}", self.user, self.host, self.port, cwd),
            None => format!("ftp://{}@{}:{}", self.user, self.host, self.port),
        }
    }

    #[named]
    fn push(&self, archive: &Path) -> Result<()> {
        let file_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_config(format!("{:?} has no file name", archive)))?;
        let mut file = BufReader::new(File::open(archive)?);

        let mut stream = self.connect()?;
        stream
            .login(&self.user, self.password.inner())
            .map_err(Error::from)
            .add_msg(format!("Logging in as {} failed", self.user))
            .add_fn_name(function_path!())?;
        if let Some(cwd) = &self.cwd {
            stream
                .cwd(cwd)
                .map_err(Error::from)
                .add_msg(format!("Changing directory to {:?} failed", cwd))
                .add_fn_name(function_path!())?;
        }
        stream.transfer_type(FileType::Binary)?;

        let sent = stream
            .put_file(file_name, &mut file)
            .map_err(Error::from)
            .add_msg(format!("Storing {} failed", file_name))
            .add_fn_name(function_path!())?;
        tracing::debug!("Sent {} bytes to {}", sent, self.host);

        stream.quit()?;
        Ok(())
    }
}
