//! REST client for a variation-normalizer style translation service.

use crate::common::GenomeRelease;
use crate::vrs::{digest, Variation};

use super::{TranslateError, TranslateOptions, Translator};

/// Client for the normalizer REST endpoint.
pub struct RestTranslator {
    endpoint_base: String,
    client: reqwest::blocking::Client,
}

impl RestTranslator {
    /// Build a client and probe the endpoint once.
    pub fn new(endpoint_uri: &str) -> Result<Self, TranslateError> {
        let endpoint_base = endpoint_uri.trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TranslateError::Connection(e.to_string()))?;

        let probe = format!("{}/openapi.json", endpoint_base);
        let response = client
            .get(&probe)
            .send()
            .map_err(|e| TranslateError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TranslateError::Connection(format!(
                "failed to get response from translator endpoint at {}",
                probe
            )));
        }
        Ok(Self {
            endpoint_base,
            client,
        })
    }

    fn get_json(&self, url: &str) -> Result<serde_json::Value, TranslateError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| TranslateError::Connection(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Err(TranslateError::Connection(format!(
                "failed to get response from translator endpoint at {}",
                url
            )));
        }
        if status.is_server_error() {
            return Err(TranslateError::Connection(format!(
                "translator endpoint returned server error for {}",
                url
            )));
        }
        if !status.is_success() {
            return Err(TranslateError::Connection(format!(
                "translator endpoint returned {} for {}",
                status, url
            )));
        }
        response
            .json()
            .map_err(|e| TranslateError::Connection(e.to_string()))
    }

    fn variation_from_response(
        definition: &str,
        response: serde_json::Value,
    ) -> Result<Variation, TranslateError> {
        if let Some(warnings) = response.get("warnings").and_then(|w| w.as_array()) {
            if !warnings.is_empty() {
                return Err(TranslateError::Translation(definition.to_string()));
            }
        }
        let variation_value = response
            .get("variation")
            .cloned()
            .ok_or_else(|| TranslateError::Translation(definition.to_string()))?;
        match variation_value.get("type").and_then(|t| t.as_str()) {
            Some("Allele") | Some("CopyNumberCount") | Some("CopyNumberChange") => {}
            Some(_) => return Err(TranslateError::NotImplemented(definition.to_string())),
            None => return Err(TranslateError::Translation(definition.to_string())),
        }
        let mut variation: Variation = serde_json::from_value(variation_value)
            .map_err(|_| TranslateError::Translation(definition.to_string()))?;
        // Identifiers from the remote service are advisory; recompute so
        // registration is digest-stable regardless of its version.
        digest::recursive_identify(&mut variation);
        Ok(variation)
    }
}

impl Translator for RestTranslator {
    fn translate_variation(
        &self,
        definition: &str,
        options: &TranslateOptions,
    ) -> Result<Variation, TranslateError> {
        let mut url = format!(
            "{}/normalize?q={}",
            self.endpoint_base,
            urlencode(definition)
        );
        if let Some(copies) = options.copies {
            url.push_str(&format!("&copies={}", copies));
        }
        if let Some(copy_change) = &options.copy_change {
            url.push_str(&format!("&copy_change={}", urlencode(copy_change)));
        }
        if let Some(assembly_name) = &options.assembly_name {
            url.push_str(&format!("&assembly_name={}", urlencode(assembly_name)));
        }
        let response = self.get_json(&url)?;
        Self::variation_from_response(definition, response)
    }

    fn translate_vcf_row(
        &self,
        coords: &str,
        assembly: GenomeRelease,
    ) -> Result<Variation, TranslateError> {
        let url = format!(
            "{}/translate_from?variation={}&fmt=gnomad&assembly_name={}",
            self.endpoint_base,
            urlencode(coords),
            assembly.name()
        );
        let response = self.get_json(&url)?;
        Self::variation_from_response(coords, response)
    }

    fn get_sequence_id(&self, accession: &str) -> Result<String, TranslateError> {
        let aliases = self.translate_sequence_identifier(accession, "ga4gh")?;
        aliases
            .into_iter()
            .next()
            .ok_or_else(|| TranslateError::UnknownSequence(accession.to_string()))
    }

    fn translate_sequence_identifier(
        &self,
        accession: &str,
        namespace: &str,
    ) -> Result<Vec<String>, TranslateError> {
        let url = format!(
            "{}/translate_identifier?identifier={}&target_namespaces={}",
            self.endpoint_base,
            urlencode(accession),
            urlencode(namespace)
        );
        let response = self.get_json(&url)?;
        if let Some(warnings) = response.get("warnings").and_then(|w| w.as_array()) {
            if !warnings.is_empty() {
                return Ok(vec![]);
            }
        }
        Ok(response
            .get("aliases")
            .and_then(|a| a.as_array())
            .map(|aliases| {
                aliases
                    .iter()
                    .filter_map(|a| a.as_str())
                    .map(|a| a.to_string())
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
