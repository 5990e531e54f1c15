//! Record-transform subprocesses: JSON-line framing over stdin/stdout,
//! one record in, one record out.

use pgsync_models::{Record, TransformSpec};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::info;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Cannot spawn transform {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transform {0} closed its pipe")]
    Closed(String),

    #[error("Transform io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transform produced invalid record: {0}")]
    InvalidRecord(#[from] serde_json::Error),
}

struct TransformIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One running transform subprocess. Applies are serialised so request and
/// response lines stay paired.
pub struct Transform {
    name: String,
    _child: Child,
    io: Mutex<TransformIo>,
}

impl Transform {
    pub fn spawn(spec: &TransformSpec) -> Result<Self, TransformError> {
        let mut child = Command::new(format!("plugins/{}", spec.name))
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransformError::Spawn {
                name: spec.name.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransformError::Closed(spec.name.clone()))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| TransformError::Closed(spec.name.clone()))?;

        info!("Started transform {}", spec.name);
        Ok(Transform {
            name: spec.name.clone(),
            _child: child,
            io: Mutex::new(TransformIo { stdin, stdout }),
        })
    }

    pub async fn apply(&self, record: Record) -> Result<Record, TransformError> {
        let mut io = self.io.lock().await;

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.flush().await?;

        let mut response = String::new();
        if io.stdout.read_line(&mut response).await? == 0 {
            return Err(TransformError::Closed(self.name.clone()));
        }
        Ok(serde_json::from_str(&response)?)
    }
}

/// The ordered transform pipeline of one index.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Transform>,
}

impl TransformChain {
    pub fn start(specs: &[TransformSpec]) -> Result<Self, TransformError> {
        let transforms = specs
            .iter()
            .map(Transform::spawn)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransformChain { transforms })
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub async fn apply(&self, mut record: Record) -> Result<Record, TransformError> {
        for transform in &self.transforms {
            record = transform.apply(record).await?;
        }
        Ok(record)
    }
}
