// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Streaming access to `<package>` elements of a listing document. */

use {
    crate::{error::Result, metadata::XmlPackage},
    std::io::{Read, Write},
    xml::{
        reader::{EventReader, ParserConfig, XmlEvent as ReaderEvent},
        writer::EventWriter,
    },
};

/// The buffered events of one `<package>` element.
///
/// Whitespace between elements is not retained.
#[derive(Clone, Debug)]
pub struct PackageElement {
    events: Vec<ReaderEvent>,
}

impl PackageElement {
    /// Value of an attribute of the `<package>` element itself.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match self.events.first() {
            Some(ReaderEvent::StartElement { attributes, .. }) => attributes
                .iter()
                .find(|a| a.name.local_name == name)
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }

    /// Iterate events of direct children as `(depth, event)`, the package being depth 1.
    fn with_depth(&self) -> impl Iterator<Item = (usize, &ReaderEvent)> + '_ {
        let mut depth = 0;

        self.events.iter().map(move |event| match event {
            ReaderEvent::StartElement { .. } => {
                depth += 1;
                (depth, event)
            }
            ReaderEvent::EndElement { .. } => {
                depth -= 1;
                (depth + 1, event)
            }
            _ => (depth, event),
        })
    }

    /// Attribute of the first direct child element with a local name.
    pub fn child_attribute(&self, child: &str, name: &str) -> Option<&str> {
        self.with_depth().find_map(|(depth, event)| match event {
            ReaderEvent::StartElement {
                name: element,
                attributes,
                ..
            } if depth == 2 && element.local_name == child => attributes
                .iter()
                .find(|a| a.name.local_name == name)
                .map(|a| a.value.as_str()),
            _ => None,
        })
    }

    /// Text content of the first direct child element with a local name.
    pub fn child_text(&self, child: &str) -> Option<String> {
        let mut text: Option<String> = None;

        for (depth, event) in self.with_depth() {
            match event {
                ReaderEvent::StartElement { name, .. }
                    if text.is_none() && depth == 2 && name.local_name == child =>
                {
                    text = Some(String::new());
                }
                ReaderEvent::Characters(s) if depth == 2 => {
                    if let Some(text) = text.as_mut() {
                        text.push_str(s);
                    }
                }
                ReaderEvent::EndElement { .. } if depth == 2 && text.is_some() => {
                    return text;
                }
                _ => {}
            }
        }

        text
    }

    /// The package checksum identifying this record in a listing of `kind`.
    pub fn package_id(&self, kind: XmlPackage) -> Option<String> {
        match kind {
            XmlPackage::Primary => self.child_text("checksum").map(|s| s.trim().to_string()),
            XmlPackage::Other | XmlPackage::Filelists => {
                self.attribute("pkgid").map(|s| s.to_string())
            }
        }
    }

    /// Re-emit the element through a writer.
    pub fn write_to<W: Write>(&self, writer: &mut EventWriter<W>) -> Result<()> {
        for event in &self.events {
            if let Some(event) = event.as_writer_event() {
                writer.write(event)?;
            }
        }

        Ok(())
    }
}

fn is_package_start(event: &ReaderEvent) -> bool {
    matches!(event, ReaderEvent::StartElement { name, .. } if name.local_name == "package")
}

/// Iterates the `<package>` children of a document's root element.
pub struct PackageElements<R: Read> {
    reader: EventReader<R>,
    depth: usize,
    done: bool,
}

impl<R: Read> PackageElements<R> {
    pub fn new(source: R) -> Self {
        let reader = ParserConfig::new()
            .cdata_to_characters(true)
            .ignore_comments(true)
            .create_reader(source);

        Self {
            reader,
            depth: 0,
            done: false,
        }
    }

    fn next_package(&mut self) -> Result<Option<PackageElement>> {
        let mut events: Option<Vec<ReaderEvent>> = None;

        loop {
            let event = self.reader.next()?;

            match event {
                ReaderEvent::EndDocument => return Ok(None),
                ReaderEvent::StartElement { .. } => {
                    self.depth += 1;

                    if self.depth == 2 && is_package_start(&event) {
                        events = Some(vec![]);
                    }

                    if let Some(events) = events.as_mut() {
                        events.push(event);
                    }
                }
                ReaderEvent::EndElement { .. } => {
                    self.depth = self.depth.saturating_sub(1);

                    if let Some(buffer) = events.as_mut() {
                        buffer.push(event);

                        if self.depth == 1 {
                            return Ok(events.take().map(|events| PackageElement { events }));
                        }
                    }
                }
                ReaderEvent::Characters(_) => {
                    if let Some(events) = events.as_mut() {
                        events.push(event);
                    }
                }
                _ => {}
            }
        }
    }
}

impl<R: Read> Iterator for PackageElements<R> {
    type Item = Result<PackageElement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_package() {
            Ok(Some(package)) => Some(Ok(package)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
