use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::common::{is_placeholder, known, or_placeholder, placeholder};

/// Every field of the canonical instrument record.
///
/// This is the table the reconciliation engine walks when it compares an
/// incoming record against a persisted one; adding a field here is the only
/// way to make it participate in change tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentField {
    GroupCode,
    TestCode,
    Name,
    #[serde(rename = "type")]
    Type,
    Brand,
    Model,
    SerialNumber,
    Location,
    MeasurementRange,
    Unit,
    Class,
    Status,
    CertificateId,
    CertificateExpiry,
    Description,
    AcceptanceCriterion,
    OperatingInterval,
}

impl InstrumentField {
    pub const ALL: [InstrumentField; 17] = [
        InstrumentField::GroupCode,
        InstrumentField::TestCode,
        InstrumentField::Name,
        InstrumentField::Type,
        InstrumentField::Brand,
        InstrumentField::Model,
        InstrumentField::SerialNumber,
        InstrumentField::Location,
        InstrumentField::MeasurementRange,
        InstrumentField::Unit,
        InstrumentField::Class,
        InstrumentField::Status,
        InstrumentField::CertificateId,
        InstrumentField::CertificateExpiry,
        InstrumentField::Description,
        InstrumentField::AcceptanceCriterion,
        InstrumentField::OperatingInterval,
    ];

    /// Fields a record cannot be persisted without.
    pub const MANDATORY: [InstrumentField; 2] = [InstrumentField::Name, InstrumentField::Type];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentField::GroupCode => "group_code",
            InstrumentField::TestCode => "test_code",
            InstrumentField::Name => "name",
            InstrumentField::Type => "type",
            InstrumentField::Brand => "brand",
            InstrumentField::Model => "model",
            InstrumentField::SerialNumber => "serial_number",
            InstrumentField::Location => "location",
            InstrumentField::MeasurementRange => "measurement_range",
            InstrumentField::Unit => "unit",
            InstrumentField::Class => "class",
            InstrumentField::Status => "status",
            InstrumentField::CertificateId => "certificate_id",
            InstrumentField::CertificateExpiry => "certificate_expiry",
            InstrumentField::Description => "description",
            InstrumentField::AcceptanceCriterion => "acceptance_criterion",
            InstrumentField::OperatingInterval => "operating_interval",
        }
    }
}

impl fmt::Display for InstrumentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("Unknown instrument field: {}", s))
    }
}

/// Normalized instrument data in the fixed field schema.
///
/// Deserialization accepts both the snake_case keys and the column names of
/// the legacy JSON export. Missing, null and blank values all land on the
/// placeholder, so a record built through serde always satisfies the
/// placeholder invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "SPG")]
    pub group_code: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Ensaio")]
    pub test_code: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Instrumento")]
    pub name: String,
    #[serde(
        rename = "type",
        default = "placeholder",
        deserialize_with = "text_or_placeholder",
        alias = "Tipo"
    )]
    pub instrument_type: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Marca")]
    pub brand: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Modelo")]
    pub model: String,
    #[serde(
        default = "placeholder",
        deserialize_with = "text_or_placeholder",
        alias = "Número de Série"
    )]
    pub serial_number: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Localização")]
    pub location: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Faixa")]
    pub measurement_range: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Unidade")]
    pub unit: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Classe")]
    pub class: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Status")]
    pub status: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Certificado")]
    pub certificate_id: String,
    #[serde(
        default = "placeholder",
        deserialize_with = "text_or_placeholder",
        alias = "ValidadeCertificado"
    )]
    pub certificate_expiry: String,
    #[serde(default = "placeholder", deserialize_with = "text_or_placeholder", alias = "Descrição")]
    pub description: String,
    #[serde(
        default = "placeholder",
        deserialize_with = "text_or_placeholder",
        alias = "CriterioAceitacao"
    )]
    pub acceptance_criterion: String,
    #[serde(
        default = "placeholder",
        deserialize_with = "text_or_placeholder",
        alias = "IntervaloOperacao"
    )]
    pub operating_interval: String,
}

impl Default for CanonicalRecord {
    fn default() -> Self {
        Self {
            group_code: placeholder(),
            test_code: placeholder(),
            name: placeholder(),
            instrument_type: placeholder(),
            brand: placeholder(),
            model: placeholder(),
            serial_number: placeholder(),
            location: placeholder(),
            measurement_range: placeholder(),
            unit: placeholder(),
            class: placeholder(),
            status: placeholder(),
            certificate_id: placeholder(),
            certificate_expiry: placeholder(),
            description: placeholder(),
            acceptance_criterion: placeholder(),
            operating_interval: placeholder(),
        }
    }
}

impl CanonicalRecord {
    pub fn new(name: &str, instrument_type: &str) -> Self {
        Self {
            name: or_placeholder(name),
            instrument_type: or_placeholder(instrument_type),
            ..Self::default()
        }
    }

    pub fn get(&self, field: InstrumentField) -> &str {
        match field {
            InstrumentField::GroupCode => &self.group_code,
            InstrumentField::TestCode => &self.test_code,
            InstrumentField::Name => &self.name,
            InstrumentField::Type => &self.instrument_type,
            InstrumentField::Brand => &self.brand,
            InstrumentField::Model => &self.model,
            InstrumentField::SerialNumber => &self.serial_number,
            InstrumentField::Location => &self.location,
            InstrumentField::MeasurementRange => &self.measurement_range,
            InstrumentField::Unit => &self.unit,
            InstrumentField::Class => &self.class,
            InstrumentField::Status => &self.status,
            InstrumentField::CertificateId => &self.certificate_id,
            InstrumentField::CertificateExpiry => &self.certificate_expiry,
            InstrumentField::Description => &self.description,
            InstrumentField::AcceptanceCriterion => &self.acceptance_criterion,
            InstrumentField::OperatingInterval => &self.operating_interval,
        }
    }

    fn slot(&mut self, field: InstrumentField) -> &mut String {
        match field {
            InstrumentField::GroupCode => &mut self.group_code,
            InstrumentField::TestCode => &mut self.test_code,
            InstrumentField::Name => &mut self.name,
            InstrumentField::Type => &mut self.instrument_type,
            InstrumentField::Brand => &mut self.brand,
            InstrumentField::Model => &mut self.model,
            InstrumentField::SerialNumber => &mut self.serial_number,
            InstrumentField::Location => &mut self.location,
            InstrumentField::MeasurementRange => &mut self.measurement_range,
            InstrumentField::Unit => &mut self.unit,
            InstrumentField::Class => &mut self.class,
            InstrumentField::Status => &mut self.status,
            InstrumentField::CertificateId => &mut self.certificate_id,
            InstrumentField::CertificateExpiry => &mut self.certificate_expiry,
            InstrumentField::Description => &mut self.description,
            InstrumentField::AcceptanceCriterion => &mut self.acceptance_criterion,
            InstrumentField::OperatingInterval => &mut self.operating_interval,
        }
    }

    /// Sets a field, mapping blank input onto the placeholder.
    pub fn set(&mut self, field: InstrumentField, value: &str) {
        *self.slot(field) = or_placeholder(value);
    }

    pub fn with(mut self, field: InstrumentField, value: &str) -> Self {
        self.set(field, value);
        self
    }

    /// Durable identity: serial number when known, otherwise the name.
    pub fn identity_key(&self) -> Option<&str> {
        known(&self.serial_number).or_else(|| known(&self.name))
    }

    /// Mandatory fields still holding the placeholder.
    pub fn missing_mandatory(&self) -> Vec<InstrumentField> {
        InstrumentField::MANDATORY
            .iter()
            .copied()
            .filter(|field| is_placeholder(self.get(*field)))
            .collect()
    }

    /// Fields that violate the placeholder invariant (empty or padded text).
    pub fn blank_fields(&self) -> Vec<InstrumentField> {
        InstrumentField::ALL
            .iter()
            .copied()
            .filter(|field| {
                let value = self.get(*field);
                value.is_empty() || value.trim() != value
            })
            .collect()
    }
}

fn text_or_placeholder<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => or_placeholder(&s),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => placeholder(),
    })
}
