//! Network persistence.
//!
//! Two formats:
//!
//! - A line-oriented text dump, always available:
//!
//!   ```text
//!   <nlayers>
//!   <nunits incl. bias> <bias code> <unit codes...>     (one line per layer)
//!   <connected 0|1>
//!   <parameters in canonical order>                     (only if connected)
//!   <d1 0|1> <d2 0|1> <vd1 0|1>
//!   ```
//!
//!   Loading re-allocates the flagged substrates. Cross substrates and the tracking mode are
//!   not part of the dump; the variational substrate is restored tracking all parameters.
//!
//! - A versioned JSON document (feature: `serde`). It does not serialize the internal
//!   `Network`/`Layer` structs directly, so the on-disk format stays stable if the internal
//!   representation changes.

use std::fmt::Write as _;
use std::path::Path;

use crate::deriv::{DerivFlags, ParamTracking};
use crate::{Activation, Error, Network, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

impl Network {
    /// Render the text dump.
    pub fn to_text_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.nlayers());
        for mut codes in self.description() {
            // The bias unit is constant 1 whatever its code; always dump it as identity.
            codes[0] = Activation::Identity.code();
            let _ = writeln!(out, "{} {}", codes.len(), codes.join(" "));
        }
        let _ = writeln!(out, "{}", u8::from(self.is_connected()));
        if let Ok(params) = self.parameters() {
            let line: Vec<String> = params.iter().map(|b| format!("{b:e}")).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        let flags = self.substrates();
        let _ = writeln!(
            out,
            "{} {} {}",
            u8::from(flags.contains(DerivFlags::D1)),
            u8::from(flags.contains(DerivFlags::D2)),
            u8::from(flags.contains(DerivFlags::VD1)),
        );
        out
    }

    /// Parse a text dump produced by [`Network::to_text_string`].
    pub fn from_text_str(s: &str) -> Result<Self> {
        let mut tokens = Tokens(s.split_whitespace());

        let nlayers: usize = tokens.parse("layer count")?;
        let mut description = Vec::with_capacity(nlayers);
        for l in 0..nlayers {
            let nunits: usize = tokens.parse("unit count")?;
            let codes = (0..nunits)
                .map(|_| tokens.next(&format!("activation code in layer {l}")))
                .collect::<Result<Vec<_>>>()?;
            description.push(codes);
        }
        let mut net = Network::from_description(&description)?;

        if tokens.flag("connected flag")? {
            net.connect()?;
            let params = (0..net.nparams())
                .map(|_| tokens.parse::<f64>("parameter"))
                .collect::<Result<Vec<_>>>()?;
            if params.iter().any(|b| !b.is_finite()) {
                return Err(Error::InvalidData(
                    "parameters must contain only finite values".to_owned(),
                ));
            }
            net.set_parameters(&params)?;
        }

        let d1 = tokens.flag("first derivative flag")?;
        let d2 = tokens.flag("second derivative flag")?;
        let vd1 = tokens.flag("variational derivative flag")?;
        if d1 {
            net.add_substrates(DerivFlags::D1);
        }
        if d2 {
            net.add_substrates(DerivFlags::D2);
        }
        if vd1 {
            net.add_variational_substrate(ParamTracking::All);
        }

        if let Some(extra) = tokens.0.next() {
            return Err(Error::InvalidData(format!(
                "unexpected trailing token `{extra}`"
            )));
        }
        Ok(net)
    }

    /// Write the text dump to `path`.
    pub fn save_text<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        std::fs::write(p, self.to_text_string())
            .map_err(|e| Error::Io(format!("failed to write {}: {e}", p.display())))
    }

    /// Load a text dump from `path`.
    pub fn load_text<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::Io(format!("failed to read {}: {e}", p.display())))?;
        Self::from_text_str(&s)
    }
}

struct Tokens<'a, I: Iterator<Item = &'a str>>(I);

impl<'a, I: Iterator<Item = &'a str>> Tokens<'a, I> {
    fn next(&mut self, what: &str) -> Result<&'a str> {
        self.0
            .next()
            .ok_or_else(|| Error::InvalidData(format!("unexpected end of input, expected {what}")))
    }

    fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let tok = self.next(what)?;
        tok.parse()
            .map_err(|_| Error::InvalidData(format!("invalid {what} `{tok}`")))
    }

    fn flag(&mut self, what: &str) -> Result<bool> {
        match self.next(what)? {
            "0" => Ok(false),
            "1" => Ok(true),
            tok => Err(Error::InvalidData(format!("invalid {what} `{tok}`"))),
        }
    }
}

pub const NETWORK_FORMAT_VERSION: u32 = 1;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedNetwork {
    pub format_version: u32,
    pub layers: Vec<SerializedLayer>,
    /// Canonical order; `None` for a disconnected network.
    pub parameters: Option<Vec<f64>>,
    pub substrates: SerializedSubstrates,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedLayer {
    pub bias: Activation,
    pub units: Vec<Activation>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SerializedSubstrates {
    pub d1: bool,
    pub d2: bool,
    pub vd1: bool,
    pub cross1: bool,
    pub cross2: bool,
    pub tracking: ParamTracking,
}

impl SerializedSubstrates {
    fn flags(self) -> DerivFlags {
        let mut flags = DerivFlags::NONE;
        for (on, flag) in [
            (self.d1, DerivFlags::D1),
            (self.d2, DerivFlags::D2),
            (self.vd1, DerivFlags::VD1),
            (self.cross1, DerivFlags::CROSS1),
            (self.cross2, DerivFlags::CROSS2),
        ] {
            if on {
                flags |= flag;
            }
        }
        flags
    }
}

impl SerializedNetwork {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != NETWORK_FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported network format_version {}; expected {}",
                self.format_version, NETWORK_FORMAT_VERSION
            )));
        }
        if self.layers.len() < 3 {
            return Err(Error::InvalidData(format!(
                "serialized network must have at least 3 layers (got {})",
                self.layers.len()
            )));
        }
        if let Some(i) = self.layers.iter().position(|l| l.units.is_empty()) {
            return Err(Error::InvalidData(format!("layer {i} has no units")));
        }
        if let Some(params) = &self.parameters {
            let expected: usize = self
                .layers
                .windows(2)
                .map(|w| (w[0].units.len() + 1) * w[1].units.len())
                .sum();
            if params.len() != expected {
                return Err(Error::InvalidData(format!(
                    "parameters length {} does not match topology ({expected})",
                    params.len()
                )));
            }
            if params.iter().any(|b| !b.is_finite()) {
                return Err(Error::InvalidData(
                    "parameters must contain only finite values".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

impl From<&Network> for SerializedNetwork {
    fn from(net: &Network) -> Self {
        let layers = net
            .layers()
            .iter()
            .map(|layer| SerializedLayer {
                bias: layer.bias_unit().activation(),
                units: layer.units().iter().map(|u| u.activation()).collect(),
            })
            .collect();
        let flags = net.substrates();
        Self {
            format_version: NETWORK_FORMAT_VERSION,
            layers,
            parameters: net.parameters().ok().map(<[f64]>::to_vec),
            substrates: SerializedSubstrates {
                d1: flags.contains(DerivFlags::D1),
                d2: flags.contains(DerivFlags::D2),
                vd1: flags.contains(DerivFlags::VD1),
                cross1: flags.contains(DerivFlags::CROSS1),
                cross2: flags.contains(DerivFlags::CROSS2),
                tracking: net.tracking(),
            },
        }
    }
}

impl TryFrom<SerializedNetwork> for Network {
    type Error = Error;

    fn try_from(value: SerializedNetwork) -> std::result::Result<Self, Self::Error> {
        value.validate()?;

        let description: Vec<Vec<&str>> = value
            .layers
            .iter()
            .map(|l| {
                std::iter::once(l.bias.code())
                    .chain(l.units.iter().map(|a| a.code()))
                    .collect()
            })
            .collect();
        let mut net = Network::from_description(&description)?;

        if let Some(params) = &value.parameters {
            net.connect()?;
            net.set_parameters(params)?;
        }

        let flags = value.substrates.flags();
        if flags.contains(DerivFlags::VD1) {
            net.add_variational_substrate(value.substrates.tracking);
        }
        net.add_substrates(flags);
        Ok(net)
    }
}

#[cfg(feature = "serde")]
impl Network {
    /// Serialize the network to a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String> {
        let ser = SerializedNetwork::from(self);
        serde_json::to_string_pretty(&ser)
            .map_err(|e| Error::InvalidData(format!("failed to serialize network: {e}")))
    }

    /// Parse a network from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let ser: SerializedNetwork = serde_json::from_str(s)
            .map_err(|e| Error::InvalidData(format!("failed to parse network json: {e}")))?;
        ser.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Network {
        let mut net = Network::from_description(&[
            vec!["ID", "ID", "ID"],
            vec!["ID", "GSS"],
            vec!["ID", "ID", "LGS"],
        ])
        .unwrap();
        net.connect().unwrap();
        net.set_parameters(&[0.2, -1.1, 0.9, 1.0, -1.0, 0.0, 0.5])
            .unwrap();
        net.add_substrates(DerivFlags::D2 | DerivFlags::VD1);
        net
    }

    #[test]
    fn text_dump_layout() {
        let text = sample().to_text_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "3");
        assert_eq!(lines[1], "3 ID ID ID");
        assert_eq!(lines[2], "2 ID GSS");
        assert_eq!(lines[3], "3 ID ID LGS");
        assert_eq!(lines[4], "1");
        assert_eq!(lines[5].split_whitespace().count(), 7);
        assert_eq!(lines[6], "1 1 1");
    }

    #[test]
    fn text_dump_round_trips() {
        let net = sample();
        let loaded = Network::from_text_str(&net.to_text_string()).unwrap();
        assert_eq!(loaded.description(), net.description());
        assert_eq!(loaded.parameters().unwrap(), net.parameters().unwrap());
        assert_eq!(loaded.substrates(), net.substrates());
        assert_eq!(loaded.tracking(), ParamTracking::All);
    }

    #[test]
    fn disconnected_dump_has_no_parameters() {
        let net = Network::new(1, 2, 1).unwrap();
        let text = net.to_text_string();
        assert_eq!(text, "3\n2 ID ID\n3 ID LGS LGS\n2 ID LGS\n0\n0 0 0\n");
        let loaded = Network::from_text_str(&text).unwrap();
        assert!(!loaded.is_connected());
        assert_eq!(loaded.nparams(), 7);
    }

    #[test]
    fn bias_code_is_dumped_as_identity() {
        let mut net = Network::from_description(&[
            vec!["LGS", "ID"],
            vec!["TANS", "GSS"],
            vec!["EXP", "ID"],
        ])
        .unwrap();
        net.connect().unwrap();
        net.set_parameters(&[0.1, 0.2, 0.3, 0.4]).unwrap();
        let text = net.to_text_string();
        assert!(text.starts_with("3\n2 ID ID\n2 ID GSS\n2 ID ID\n1\n"), "{text}");

        let mut loaded = Network::from_text_str(&text).unwrap();
        for n in [&mut net, &mut loaded] {
            n.set_input(&[0.7]).unwrap();
            n.propagate().unwrap();
        }
        assert_eq!(net.output(0).unwrap(), loaded.output(0).unwrap());
    }

    #[test]
    fn malformed_dumps_fail() {
        let unknown = "3\n2 ID ID\n2 ID FOO\n2 ID ID\n0\n0 0 0\n";
        assert_eq!(
            Network::from_text_str(unknown).unwrap_err(),
            Error::UnknownActivation("FOO".to_owned())
        );
        let truncated = "3\n2 ID ID\n2 ID GSS\n2 ID ID\n1\n0.5 0.5\n";
        assert!(matches!(
            Network::from_text_str(truncated),
            Err(Error::InvalidData(_))
        ));
        let bad_flag = "3\n2 ID ID\n2 ID GSS\n2 ID ID\n2\n";
        assert!(matches!(
            Network::from_text_str(bad_flag),
            Err(Error::InvalidData(_))
        ));
        let trailing = "3\n2 ID ID\n2 ID GSS\n2 ID ID\n0\n0 0 0\nextra\n";
        assert!(matches!(
            Network::from_text_str(trailing),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn file_round_trip_and_missing_file() {
        let path = std::env::temp_dir().join(format!("ffnn_fit_persist_{}.txt", std::process::id()));
        let net = sample();
        net.save_text(&path).unwrap();
        let loaded = Network::load_text(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.parameters().unwrap(), net.parameters().unwrap());
        assert!(matches!(Network::load_text(&path), Err(Error::Io(_))));
    }

    #[test]
    fn serialized_network_validates_parameter_count() {
        let mut ser = SerializedNetwork::from(&sample());
        assert!(ser.validate().is_ok());
        ser.parameters = Some(vec![0.0; 3]);
        assert!(matches!(
            Network::try_from(ser.clone()),
            Err(Error::InvalidData(_))
        ));
        ser.parameters = None;
        ser.format_version = 999;
        let err = ser.validate().unwrap_err();
        assert!(format!("{err}").contains("format_version"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trips_substrates_and_tracking() {
        let mut net = sample();
        net.add_variational_substrate(ParamTracking::LastTwoLayers);
        net.add_substrates(DerivFlags::CROSS2);
        let json = net.to_json_string_pretty().unwrap();
        let loaded = Network::from_json_str(&json).unwrap();
        assert_eq!(loaded.substrates(), DerivFlags::ALL);
        assert_eq!(loaded.tracking(), ParamTracking::LastTwoLayers);
        assert_eq!(loaded.parameters().unwrap(), net.parameters().unwrap());
        assert_eq!(loaded.to_json_string_pretty().unwrap(), json);
    }
}
