//! Plain HTTP probe: one configured request, judged by status code.

use crate::config::HttpContractEntry;
use crate::error::{AgentError, AgentResult};

use super::{ContractVector, Expectation, ProbeRequest, ServiceProbe};

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "PATCH"];

pub struct HttpProbe {
    service_type: String,
    request: ProbeRequest,
    expect_status: u16,
    contract: Vec<ContractVector>,
}

fn request(method: &str, path: &str, body: Option<&str>) -> AgentResult<ProbeRequest> {
    let method = method.to_ascii_uppercase();
    if !METHODS.contains(&method.as_str()) {
        return Err(AgentError::Config(format!("unsupported probe method {method:?}")));
    }
    if !path.starts_with('/') {
        return Err(AgentError::Config(format!("probe path {path:?} must start with '/'")));
    }
    Ok(match body {
        Some(b) => ProbeRequest {
            method,
            ..ProbeRequest::post_json(path, b.as_bytes().to_vec())
        },
        None => ProbeRequest {
            method,
            ..ProbeRequest::get(path)
        },
    })
}

impl HttpProbe {
    pub fn new(
        service_type: &str,
        method: &str,
        path: &str,
        body: Option<String>,
        expect_status: u16,
        contract: &[HttpContractEntry],
    ) -> AgentResult<Self> {
        let vectors = contract
            .iter()
            .map(|c| {
                Ok(ContractVector {
                    name: c.name.clone(),
                    request: request(&c.method, &c.path, c.body.as_deref())?,
                    expect: Expectation::status(c.expect_status),
                })
            })
            .collect::<AgentResult<Vec<_>>>()?;

        Ok(Self {
            service_type: service_type.to_string(),
            request: request(method, path, body.as_deref())?,
            expect_status,
            contract: vectors,
        })
    }
}

impl ServiceProbe for HttpProbe {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn build_request(&self) -> ProbeRequest {
        self.request.clone()
    }

    fn validate_response(&self, status: u16, _body: &[u8]) -> Result<(), String> {
        if status == self.expect_status {
            Ok(())
        } else {
            Err(format!("expected status {}, got {status}", self.expect_status))
        }
    }

    fn contract_vectors(&self) -> Vec<ContractVector> {
        self.contract.clone()
    }
}
