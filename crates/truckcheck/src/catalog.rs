//! The fixed 25-point inspection catalog.
//!
//! Ordinals 1-17 cover the tractor and cargo compartment and are conform when
//! answered "SIM". Ordinals 18-19 only apply to refrigerated units and are
//! conform when "N/A". Ordinals 20-25 ask whether an incident was found and are
//! conform when "NÃO".

use std::borrow::Cow;

use serde::Serialize;

use crate::checklist::Outcome;

/// Number of inspection points in every submission.
pub const ITEM_COUNT: u8 = 25;

/// Dashboard grouping of an inspection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Tractor unit, 1-11.
    Vehicle,
    /// Cargo compartment, 12-17.
    Cargo,
    /// Refrigeration equipment, 18-19.
    Refrigeration,
    /// Security (OEA) incident checks, 20-25.
    Security,
}

impl Category {
    /// Category of an ordinal, if it is in the catalog.
    #[must_use]
    pub fn for_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            1..=11 => Some(Self::Vehicle),
            12..=17 => Some(Self::Cargo),
            18..=19 => Some(Self::Refrigeration),
            20..=25 => Some(Self::Security),
            _ => None,
        }
    }

    /// Tag used by the remote dashboard.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Vehicle => "veiculo",
            Self::Cargo => "carga",
            Self::Refrigeration => "climatizacao",
            Self::Security => "oea",
        }
    }
}

/// One inspection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Position, 1-based.
    pub ordinal: u8,
    /// Text printed on the form and document.
    pub description: &'static str,
    /// Key of the item in the dashboard document.
    pub key: &'static str,
    /// Whether a non-conform answer counts as a critical issue.
    pub critical: bool,
}

const fn point(
    ordinal: u8,
    description: &'static str,
    key: &'static str,
    critical: bool,
) -> CatalogEntry {
    CatalogEntry {
        ordinal,
        description,
        key,
        critical,
    }
}

/// The catalog, in ordinal order.
pub const CATALOG: [CatalogEntry; ITEM_COUNT as usize] = [
    point(1, "PARA CHOQUE", "paraChoque", false),
    point(2, "MOTOR", "motor", true),
    point(3, "PNEUS", "pneus", true),
    point(4, "PISO DA UNIDADE TRATORA", "pisoUnidadeTratora", false),
    point(5, "TANQUE DE COMBUSTÍVEL", "tanqueCombustivel", true),
    point(6, "CABINE", "cabine", false),
    point(7, "RESERVATÓRIO DE AR", "reservatorioAr", true),
    point(8, "EIXO DE TRANSMISSÃO", "eixoTransmissao", true),
    point(9, "QUINTA RODA", "quintaRoda", true),
    point(10, "SISTEMA DE EXAUSTÃO", "sistemaExaustao", false),
    point(11, "CHASSI", "chassi", true),
    point(12, "PORTAS TRASEIRA (BAÚ/SIDER)", "portasTraseira", false),
    point(13, "PORTA LATERAL DIREITA", "portaLateralDireita", false),
    point(14, "PORTA LATERAL ESQUERDA", "portaLateralEsquerda", false),
    point(15, "PAREDE FRONTAL", "paredeFrontal", false),
    point(16, "TETO", "teto", false),
    point(17, "PISO DO COMPARTIMENTO DE CARGA", "pisoCompartimentoCarga", false),
    point(
        18,
        "UNID. EXAUSTORA/VENTILADORES/FILTRO DE AR",
        "unidExaustora",
        false,
    ),
    point(19, "MOTOR CÂMARA FRIA", "motorCamaraFria", false),
    point(20, "ODORES", "odores", true),
    point(
        21,
        "PRAGAS VISÍVEIS (mofo, insetos, roedores e afins)",
        "pragasVisiveis",
        true,
    ),
    point(22, "CONTAMINAÇÃO QUÍMICA", "contaminacaoQuimica", true),
    point(23, "FUNDO OU PAREDE FALSA DETECTADO?", "fundoParedeFalsa", true),
    point(24, "INDÍCIOS DE CONTAMINAÇÃO?", "indiciosContaminacao", true),
    point(
        25,
        "AUTORIDADE COMPETENTE NOTIFICADA?",
        "autoridadeNotificada",
        true,
    ),
];

/// Look up an ordinal.
#[must_use]
pub fn entry(ordinal: u8) -> Option<&'static CatalogEntry> {
    CATALOG.get(usize::from(ordinal).checked_sub(1)?)
}

/// Dashboard key of an ordinal; unknown ordinals become `item_N`.
#[must_use]
pub fn item_key(ordinal: u8) -> Cow<'static, str> {
    entry(ordinal).map_or_else(
        || Cow::Owned(format!("item_{ordinal}")),
        |e| Cow::Borrowed(e.key),
    )
}

/// Dashboard category tag; unknown ordinals are "outros".
#[must_use]
pub fn category_tag(ordinal: u8) -> &'static str {
    Category::for_ordinal(ordinal).map_or("outros", Category::tag)
}

/// Whether a non-conform answer on this ordinal is a critical issue.
#[must_use]
pub fn is_critical(ordinal: u8) -> bool {
    entry(ordinal).is_some_and(|e| e.critical)
}

/// The answer that makes an ordinal conform.
#[must_use]
pub fn expected_outcome(ordinal: u8) -> Option<Outcome> {
    match ordinal {
        1..=17 => Some(Outcome::Affirmative),
        18..=19 => Some(Outcome::NotApplicable),
        20..=25 => Some(Outcome::Negative),
        _ => None,
    }
}

/// Expected answer as printed for the dashboard; "SIM" outside the catalog.
#[must_use]
pub fn expected_code(ordinal: u8) -> &'static str {
    expected_outcome(ordinal).map_or("SIM", Outcome::code)
}

/// Whether `outcome` is the conform answer for `ordinal`.
///
/// An unset outcome and an ordinal outside the catalog are never conform.
#[must_use]
pub fn is_conform(ordinal: u8, outcome: Outcome) -> bool {
    outcome.is_set() && expected_outcome(ordinal) == Some(outcome)
}
