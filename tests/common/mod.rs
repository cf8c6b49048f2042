//! Shared test doubles

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use geocache::data::{Candidate, GeocodeProvider, GeocodeRequest, ProviderError};

/// Provider answering from a script, empty once the script runs out
#[derive(Default)]
pub struct ScriptedProvider {
    answers: Mutex<VecDeque<Result<Vec<Candidate>, ProviderError>>>,
    requests: Mutex<Vec<GeocodeRequest>>,
}

#[allow(dead_code)] // Not every test binary uses every helper
impl ScriptedProvider {
    pub fn new(answers: Vec<Result<Vec<Candidate>, ProviderError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with nothing
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GeocodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodeProvider for ScriptedProvider {
    async fn geocode(&self, request: &GeocodeRequest) -> Result<Vec<Candidate>, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.answers.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }
}

#[allow(dead_code)]
pub fn found(lat: f64, lon: f64, country: &str) -> Result<Vec<Candidate>, ProviderError> {
    Ok(vec![Candidate::new(lat, lon, Some(country))])
}

#[allow(dead_code)]
pub fn nothing() -> Result<Vec<Candidate>, ProviderError> {
    Ok(Vec::new())
}

#[allow(dead_code)]
pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
