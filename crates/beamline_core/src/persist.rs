//! Line-oriented text format for element lists.
//!
//! One element per line, whitespace delimited:
//!
//! ```text
//! <type> <name> <length> <strength> <x_offset> <y_offset> <roll> <type-specific fields...>
//! ```
//!
//! | type             | type-specific fields                                  |
//! |------------------|-------------------------------------------------------|
//! | `marker`, `drift`| none                                                  |
//! | `sbend`          | angle, entry angle, exit angle, propagator            |
//! | `edge`           | edge angle                                            |
//! | `thin_multipole` | power (1 quadrupole, 2 sextupole, 3 octupole)         |
//! | `kicker`         | horizontal kick, vertical kick                        |
//! | `quadrupole`     | kick count, propagator                                |
//! | `sextupole`      | kick count                                            |
//! | `thin_rf`        | phase, frequency                                      |
//! | `rf_cavity`      | phase, frequency                                      |
//! | `cf_bend`        | angle, entry, exit, kick count, quad, sext, oct total |
//!
//! A beamline is written as `beamline <name> <count> <x_offset> <y_offset> <roll>`
//! followed by `count` element records. Blank lines and lines starting with
//! `#` are ignored. Reference times are not stored; register the elements
//! again after reading.

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};

use crate::element::{
    Alignment, Beamline, CombinedFunctionBend, Drift, Edge, Element, Kicker, Marker,
    MultipoleOrder, Quadrupole, RfCavity, SectorBend, Sextupole, ThinMultipole, ThinRfCavity,
};

pub fn write_element<W: Write>(writer: &mut W, element: &Element) -> Result<()> {
    let name = element.name();
    if name.chars().any(char::is_whitespace) {
        bail!("Element name \"{name}\" contains whitespace and cannot be written.");
    }
    let alignment = element.alignment();

    if let Element::Beamline(line) = element {
        writeln!(
            writer,
            "beamline {name} {} {} {} {}",
            line.len(),
            alignment.x_offset,
            alignment.y_offset,
            alignment.roll
        )?;
        for child in line.iter() {
            write_element(writer, child)
                .with_context(|| format!("Failed to write beamline \"{name}\"."))?;
        }
        return Ok(());
    }

    write!(
        writer,
        "{} {name} {} {} {} {} {}",
        element.kind_name(),
        element.length(),
        element.strength(),
        alignment.x_offset,
        alignment.y_offset,
        alignment.roll
    )?;
    match element {
        Element::Marker(_) | Element::Drift(_) => {}
        Element::SectorBend(e) => write!(
            writer,
            " {} {} {} {}",
            e.angle(),
            e.entry_angle(),
            e.exit_angle(),
            element.propagator_name()
        )?,
        Element::Edge(e) => write!(writer, " {}", e.angle())?,
        Element::ThinMultipole(e) => write!(writer, " {}", e.order().power())?,
        Element::Kicker(e) => write!(writer, " {} {}", e.horizontal(), e.vertical())?,
        Element::Quadrupole(e) => {
            write!(writer, " {} {}", e.kick_count(), element.propagator_name())?
        }
        Element::Sextupole(e) => write!(writer, " {}", e.kick_count())?,
        Element::ThinRfCavity(e) => write!(writer, " {} {}", e.phase(), e.frequency())?,
        Element::RfCavity(e) => write!(writer, " {} {}", e.phase(), e.frequency())?,
        Element::CombinedFunctionBend(e) => write!(
            writer,
            " {} {} {} {} {} {} {}",
            e.angle(),
            e.entry_angle(),
            e.exit_angle(),
            e.kick_count(),
            e.quadrupole(),
            e.sextupole(),
            e.octupole()
        )?,
        Element::Beamline(_) => unreachable!("beamlines are written above"),
    }
    writeln!(writer)?;
    Ok(())
}

pub fn write_elements<W: Write>(writer: &mut W, elements: &[Element]) -> Result<()> {
    for element in elements {
        write_element(writer, element)?;
    }
    Ok(())
}

pub fn elements_to_string(elements: &[Element]) -> Result<String> {
    let mut buffer = Vec::new();
    write_elements(&mut buffer, elements)?;
    String::from_utf8(buffer).context("Element records are not valid UTF-8.")
}

pub fn read_elements<R: BufRead>(reader: R) -> Result<Vec<Element>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}.", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        records.push(Record {
            line: index + 1,
            text: trimmed.to_string(),
        });
    }

    let mut rest = records.iter();
    let mut elements = Vec::new();
    while let Some(record) = rest.next() {
        elements.push(parse_record(record, &mut rest)?);
    }
    log::debug!("read {} top-level elements", elements.len());
    Ok(elements)
}

pub fn elements_from_str(text: &str) -> Result<Vec<Element>> {
    read_elements(text.as_bytes())
}

struct Record {
    line: usize,
    text: String,
}

fn parse_record<'a>(
    record: &'a Record,
    rest: &mut std::slice::Iter<'a, Record>,
) -> Result<Element> {
    let context = || format!("Invalid element record on line {}: \"{}\"", record.line, record.text);
    let mut fields = Fields::new(&record.text);
    let kind = fields.text("element type").with_context(context)?;

    if kind == "beamline" {
        let (name, count, alignment) = (|| -> Result<_> {
            let name = fields.text("name")?.to_string();
            let count = fields.count("child count")?;
            let alignment = fields.alignment()?;
            fields.finish()?;
            Ok((name, count, alignment))
        })()
        .with_context(context)?;

        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            let Some(next) = rest.next() else {
                bail!(
                    "Beamline \"{name}\" on line {} declares {count} elements but the input ends after {index}.",
                    record.line
                );
            };
            children.push(parse_record(next, rest)?);
        }
        let mut line = Element::from(Beamline::with_elements(name, children));
        line.set_alignment(alignment);
        return Ok(line);
    }

    parse_leaf(kind, &mut fields).with_context(context)
}

fn parse_leaf(kind: &str, fields: &mut Fields<'_>) -> Result<Element> {
    let name = fields.text("name")?.to_string();
    let length = fields.number("length")?;
    let strength = fields.number("strength")?;
    let alignment = fields.alignment()?;

    let mut element: Element = match kind {
        "marker" => Marker::new(name)?.into(),
        "drift" => Drift::new(name, length)?.into(),
        "sbend" => {
            let angle = fields.number("bend angle")?;
            let entry = fields.number("entry edge angle")?;
            let exit = fields.number("exit edge angle")?;
            let propagator = fields.text("propagator")?;
            let mut bend: Element =
                SectorBend::with_edges(name, length, strength, angle, entry, exit)?.into();
            bend.set_propagator_name(propagator)?;
            bend
        }
        "edge" => Edge::new(name, strength, fields.number("edge angle")?)?.into(),
        "thin_multipole" => {
            let order = MultipoleOrder::from_power(fields.count("multipole power")? as u32)?;
            ThinMultipole::new(name, order, strength)?.into()
        }
        "kicker" => {
            let horizontal = fields.number("horizontal kick")?;
            let vertical = fields.number("vertical kick")?;
            Kicker::new(name, length, horizontal, vertical)?.into()
        }
        "quadrupole" => {
            let kicks = fields.count("kick count")?;
            let propagator = fields.text("propagator")?;
            let mut quad: Element =
                Quadrupole::with_kick_count(name, length, strength, kicks)?.into();
            quad.set_propagator_name(propagator)?;
            quad
        }
        "sextupole" => {
            let kicks = fields.count("kick count")?;
            Sextupole::with_kick_count(name, length, strength, kicks)?.into()
        }
        "thin_rf" => {
            let phase = fields.number("phase")?;
            let frequency = fields.number("frequency")?;
            ThinRfCavity::new(name, strength, phase, frequency)?.into()
        }
        "rf_cavity" => {
            let phase = fields.number("phase")?;
            let frequency = fields.number("frequency")?;
            RfCavity::new(name, length, strength, phase, frequency)?.into()
        }
        "cf_bend" => {
            let angle = fields.number("bend angle")?;
            let entry = fields.number("entry edge angle")?;
            let exit = fields.number("exit edge angle")?;
            let kicks = fields.count("kick count")?;
            let mut bend =
                CombinedFunctionBend::with_edges(name, length, strength, angle, entry, exit)?;
            bend.set_kick_count(kicks)?;
            for order in MultipoleOrder::ALL {
                let total = fields.number(order.family())?;
                bend.set_multipole(order, total)?;
            }
            bend.into()
        }
        other => bail!("Unknown element type \"{other}\"."),
    };
    fields.finish()?;
    element.set_alignment(alignment);
    Ok(element)
}

struct Fields<'a> {
    tokens: std::str::SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            tokens: text.split_whitespace(),
        }
    }

    fn text(&mut self, what: &str) -> Result<&'a str> {
        self.tokens
            .next()
            .with_context(|| format!("Missing {what}."))
    }

    fn number(&mut self, what: &str) -> Result<f64> {
        let token = self.text(what)?;
        let value: f64 = token
            .parse()
            .with_context(|| format!("Invalid {what} \"{token}\"."))?;
        if !value.is_finite() {
            bail!("{what} must be finite, got {token}.");
        }
        Ok(value)
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let token = self.text(what)?;
        token
            .parse()
            .with_context(|| format!("Invalid {what} \"{token}\"."))
    }

    fn alignment(&mut self) -> Result<Alignment> {
        Ok(Alignment::new(
            self.number("x offset")?,
            self.number("y offset")?,
            self.number("roll")?,
        ))
    }

    fn finish(&mut self) -> Result<()> {
        let extra: Vec<&str> = self.tokens.by_ref().collect();
        if !extra.is_empty() {
            bail!("Unexpected trailing fields: {}.", extra.join(" "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::test_support::*;
    use crate::element::{BendPropagator, QuadrupolePropagator};

    fn every_kind() -> Vec<Element> {
        let mut mad = SectorBend::with_edges("b_mad", 1.5, 0.4, 0.04, 0.02, 0.01).unwrap();
        mad.set_propagator(BendPropagator::Mad);
        let (in_edge, out_edge) = Element::from(SectorBend::new("b", 2.0, 0.3, 0.05).unwrap())
            .split(0.25)
            .unwrap();

        let mut cf = CombinedFunctionBend::with_edges("cf", 3.0, 0.35, 0.1, 0.05, 0.05).unwrap();
        cf.set_kick_count(8).unwrap();
        cf.set_quadrupole(0.5).unwrap();
        cf.set_sextupole(2.0).unwrap();
        cf.set_octupole(-1.0).unwrap();

        let mut cell = Beamline::new("cell").unwrap();
        cell.push(Drift::new("d", 0.75).unwrap());
        cell.push(
            Quadrupole::with_kick_count("qd", 0.5, -1.25, 6)
                .unwrap()
                .with_propagator(QuadrupolePropagator::Linear),
        );
        let mut cell = Element::from(cell);
        cell.set_alignment(Alignment::new(1e-4, 0.0, 0.0));

        let mut kicked = Element::from(Kicker::new("k", 0.2, 1e-4, -2e-4).unwrap());
        kicked.set_alignment(Alignment::new(1e-3, -2e-3, 0.01));

        vec![
            Marker::new("start").unwrap().into(),
            mad.into(),
            in_edge,
            out_edge,
            Edge::new("e", 0.3, 0.03).unwrap().into(),
            ThinMultipole::new("oct", MultipoleOrder::Octupole, 12.5)
                .unwrap()
                .into(),
            kicked,
            Quadrupole::new("qf", 0.5, 1.1).unwrap().into(),
            Sextupole::with_kick_count("sx", 0.3, 4.0, 2).unwrap().into(),
            ThinRfCavity::new("gap", 1e6, 0.3, 5e8).unwrap().into(),
            RfCavity::new("cav", 1.0, 2e6, 0.2, 2e8).unwrap().into(),
            cf.into(),
            cell,
        ]
    }

    #[test]
    fn every_kind_round_trips() {
        let original = every_kind();
        let text = elements_to_string(&original).unwrap();
        let restored = elements_from_str(&text).unwrap();
        assert_eq!(restored.len(), original.len());
        assert_eq!(elements_to_string(&restored).unwrap(), text);

        let p = proton_at([1e-3, -5e-4, 0.0, 1e-4, 2e-4, 1e-4]);
        for (a, b) in original.iter().zip(&restored) {
            assert_eq!(a.kind_name(), b.kind_name());
            assert_eq!(a.name(), b.name());
            assert_eq!(a.length(), b.length());
            assert_eq!(a.alignment(), b.alignment());
            assert_eq!(a.propagator_name(), b.propagator_name());
            assert_eq!(a.children().len(), b.children().len(), "{}", a.name());
            assert_eq!(track(a, &p), track(b, &p), "{}", a.name());
        }
    }

    #[test]
    fn propagator_names_are_stored() {
        let text = elements_to_string(&every_kind()).unwrap();
        assert!(text.contains("sbend b_mad 1.5 0.4"));
        for name in ["mad", "in_edge", "out_edge", "linear", "teapot"] {
            assert!(text.contains(&format!(" {name}\n")), "missing {name} in\n{text}");
        }
    }

    #[test]
    fn comments_and_nesting_are_read() {
        let text = "\
# a short line
beamline arc 2 0 0 0

  drift d1 1.25 0 0 0 0
  beamline inner 1 0 0 0.5
    sbend b 2 0.3 0 0 0 0.05 0 0 exact
marker end 0 0 0 0 0
";
        let elements = elements_from_str(text).unwrap();
        assert_eq!(elements.len(), 2);
        let Element::Beamline(arc) = &elements[0] else {
            panic!("expected a beamline, got {}", elements[0].kind_name());
        };
        let names: Vec<_> = arc.deep_iter().map(Element::name).collect();
        assert_eq!(names, ["d1", "b"]);
        assert_eq!(arc.elements()[1].alignment().roll, 0.5);
        assert_eq!(elements[1].name(), "end");
    }

    #[test]
    fn malformed_input_is_rejected() {
        let cases = [
            ("solenoid s 1 0 0 0 0\n", "Unknown element type"),
            ("drift d 1 0 0 0\n", "Missing roll"),
            ("drift d 1 0 0 0 0 7\n", "Unexpected trailing fields"),
            ("drift d one 0 0 0 0\n", "Invalid length"),
            ("sbend b 1 0.3 0 0 0 0.05 0 0 sideways\n", "Unknown bend propagator"),
            ("beamline l 2 0 0 0\ndrift d 1 0 0 0 0\n", "declares 2 elements"),
            ("drift d -1 0 0 0 0\n", "non-negative"),
        ];
        for (text, needle) in cases {
            let err = elements_from_str(text).unwrap_err();
            let message = format!("{err:#}");
            assert!(message.contains(needle), "expected \"{needle}\" in \"{message}\"");
        }
    }

    #[test]
    fn whitespace_in_names_is_refused() {
        let drift = Element::from(Drift::new("two words", 1.0).unwrap());
        let err = elements_to_string(&[drift]).unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }
}
