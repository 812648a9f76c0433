//! Pictor test utilities.
//!
//! Helpers for integration testing: media byte fixtures and a builder for
//! multipart request bodies.

use uuid::Uuid;

/// A minimal JPEG: SOI, a JFIF APP0 segment, padding and EOI. 50 bytes.
pub fn jpeg_50() -> Vec<u8> {
    let mut bytes = vec![
        0xFF, 0xD8, // SOI
        0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00,
        0x01, 0x00, 0x00, // APP0
    ];
    bytes.resize(48, 0x00);
    bytes.extend_from_slice(&[0xFF, 0xD9]); // EOI
    bytes
}

/// A PNG signature and IHDR chunk header followed by `len - 16` filler bytes.
pub fn png_of_len(len: usize) -> Vec<u8> {
    let mut bytes = vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D',
        b'R',
    ];
    bytes.resize(len.max(bytes.len()), 0x00);
    bytes
}

/// A shell script, for uploads that must be rejected whatever they claim.
pub fn shell_script() -> Vec<u8> {
    b"#!/bin/sh\necho 'not an image'\nrm -rf /tmp/pictor-test\n".to_vec()
}

/// Builder for `multipart/form-data` bodies.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self {
            boundary: format!("pictor-{}", Uuid::now_v7().simple()),
            body: Vec::new(),
        }
    }

    /// Add a plain form field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.push(&format!(
            "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
        ));
        self.push(value);
        self.push("\r\n");
        self
    }

    /// Add a file field. `content_type` is omitted from the part when `None`.
    pub fn file(
        mut self,
        name: &str,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Self {
        self.open_part();
        self.push(&format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
        ));
        if let Some(content_type) = content_type {
            self.push(&format!("Content-Type: {content_type}\r\n"));
        }
        self.push("\r\n");
        self.body.extend_from_slice(data);
        self.push("\r\n");
        self
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Finish the body.
    pub fn build(mut self) -> Vec<u8> {
        let closing = format!("--{}--\r\n", self.boundary);
        self.push(&closing);
        self.body
    }

    fn open_part(&mut self) {
        let opening = format!("--{}\r\n", self.boundary);
        self.push(&opening);
    }

    fn push(&mut self, s: &str) {
        self.body.extend_from_slice(s.as_bytes());
    }
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}
