//! # Deployment
//!
//! A [`Deployment`] walks its instructions forward, one step per call to
//! [`Deployment::step`]. Each step advances the program counter exactly
//! once, whether or not the instruction names a target, and never backtracks.
//! Calling it again once every instruction is consumed fails with
//! [`Error::ProgramCounterExceeded`].
//!
//! A step is taken in two halves. [`Deployment::step`] is synchronous: it
//! parses the local result, claims the next instruction and builds the
//! outbound request. [`Step::finish`] sends that request, if any, and builds
//! the final answer. Nothing from the deployment is borrowed by the second
//! half, so a hop that calls back into the same deployment on the same device
//! can take the following step while the first one is still waiting.
//!
//! When a step forwards, the next hop's reply decides the media type of the
//! final response, so a chain answers in the format of its last node.

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use edgerun::Runtime;
use edgerun::SharedRuntime;
use edgerun::Value;

use crate::client;
use crate::client::ChainClient;
use crate::client::RequestBody;
pub use crate::error::Error;
pub use crate::error::Result;
use crate::description::ServiceDescription;
use crate::media::MediaType;
use crate::parse::parse_func_result;
use crate::payload::Payload;

/// One step: where to send the result, or `None` to answer the caller.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Instruction {
    #[serde(default)]
    pub to: Option<ServiceDescription>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Deployment {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub program_counter: usize,
}

/// The final answer of a chain.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainResponse {
    pub media_type: MediaType,
    pub body: serde_json::Value,
}

impl Deployment {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            program_counter: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.program_counter >= self.instructions.len()
    }

    fn check_counter(&self) -> Result<()> {
        if self.is_exhausted() {
            return Err(Error::ProgramCounterExceeded {
                counter: self.program_counter,
                len: self.instructions.len(),
            });
        }
        Ok(())
    }

    /// Takes the current instruction's target and advances the counter.
    pub fn next_target(&mut self) -> Result<Option<ServiceDescription>> {
        self.check_counter()?;
        let target = self.instructions[self.program_counter].to.clone();
        self.program_counter += 1;
        Ok(target)
    }

    /// Takes one step for a function that just returned `result`.
    ///
    /// The counter is checked before anything else and only advances once the
    /// result has been parsed, so a step that fails to parse can be retried.
    pub fn step(
        &mut self,
        runtime: &mut Runtime,
        result: Option<Value>,
        media: MediaType,
        schema: Option<&serde_json::Value>,
    ) -> Result<Step> {
        self.check_counter()?;
        let payload = parse_func_result(runtime, result, &media, schema)?;
        self.advance(payload, media)
    }

    fn advance(&mut self, payload: Payload, media: MediaType) -> Result<Step> {
        let Some(target) = self.next_target()? else {
            return Ok(Step {
                media,
                payload,
                forward: None,
            });
        };

        let endpoint = target.first_endpoint()?;
        if !endpoint.item.supports_post() {
            return Err(Error::NotImplemented(format!(
                "target {} declares {:?}, only POST is supported",
                endpoint.url,
                endpoint.item.methods()
            )));
        }
        let body = client::build_request(&media, &payload)?;
        info!(url = %endpoint.url, media_type = %media, step = self.program_counter, "forwarding");
        Ok(Step {
            media,
            payload,
            forward: Some(Forward {
                url: endpoint.url,
                body,
            }),
        })
    }

    /// Runs a whole step for a caller that owns the deployment outright.
    ///
    /// The result is parsed on the blocking pool under the runtime lock. The
    /// deployment stays borrowed across the outbound request; callers that
    /// share a deployment between requests should use [`Deployment::step`]
    /// and [`Step::finish`] and release it in between.
    pub async fn call_chain(
        &mut self,
        runtime: &SharedRuntime,
        client: &dyn ChainClient,
        result: Option<Value>,
        media: MediaType,
        schema: Option<&serde_json::Value>,
    ) -> Result<ChainResponse> {
        self.check_counter()?;

        let runtime = runtime.clone();
        let schema = schema.cloned();
        let parse_media = media.clone();
        let payload = tokio::task::spawn_blocking(move || {
            let mut runtime = runtime.blocking_lock();
            parse_func_result(&mut runtime, result, &parse_media, schema.as_ref())
        })
        .await
        .map_err(|e| Error::Runtime(e.to_string()))??;

        self.advance(payload, media)?.finish(client).await
    }
}

/// A step whose local half is done: the parsed value and, unless the chain
/// ends here, the request for the next hop.
#[derive(Debug)]
pub struct Step {
    media: MediaType,
    payload: Payload,
    forward: Option<Forward>,
}

#[derive(Debug)]
struct Forward {
    url: String,
    body: RequestBody,
}

impl Step {
    /// Where this step forwards to, if anywhere.
    pub fn target(&self) -> Option<&str> {
        self.forward.as_ref().map(|f| f.url.as_str())
    }

    /// Sends the forward, if any, and encodes the final answer.
    pub async fn finish(self, client: &dyn ChainClient) -> Result<ChainResponse> {
        let Step {
            mut media,
            mut payload,
            forward,
        } = self;

        if let Some(Forward { url, body }) = forward {
            let reply = client.post(&url, body).await?;
            if reply.status != 200 {
                warn!(%url, status = reply.status, "chained request failed");
                return Err(Error::RequestFailed {
                    status: reply.status,
                    url,
                });
            }

            media = MediaType::parse(reply.content_type.as_deref().unwrap_or_default());
            payload = Payload::from_reply(&media, &reply.body);
            debug!(media_type = %media, "chain continues with reply");
        }

        match media {
            MediaType::OctetStream => Ok(ChainResponse {
                media_type: media,
                body: serde_json::json!({ "result": payload.to_json() }),
            }),
            other => Err(Error::NotImplemented(format!(
                "responding with media type {}",
                other
            ))),
        }
    }
}
