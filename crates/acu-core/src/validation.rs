//! Field checks for the storefront forms (contact, sign-in, registration).
//!
//! Messages are the Portuguese copy shown next to each field.

use std::collections::BTreeMap;

use thiserror::Error;

/// Minimum characters in a contact name
const MIN_NAME_CHARS: usize = 2;

/// Minimum characters in a contact message
const MIN_MESSAGE_CHARS: usize = 10;

/// Minimum characters in a new password
const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Field {
    Name,
    Email,
    Message,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Email => "email",
            Field::Message => "message",
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Preencha email e senha.")]
    MissingCredentials,

    #[error("Preencha todos os campos.")]
    MissingFields,

    #[error("A senha deve ter pelo menos 6 caracteres.")]
    PasswordTooShort,

    #[error("As senhas não conferem.")]
    PasswordMismatch,
}

pub fn is_valid_name(name: &str) -> bool {
    name.trim().chars().count() >= MIN_NAME_CHARS
}

/// `local@domain.tld` shape: one `@`, no whitespace, and a dot inside the
/// domain with something on both sides of it.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if local.is_empty() {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

pub fn is_valid_message(message: &str) -> bool {
    message.trim().chars().count() >= MIN_MESSAGE_CHARS
}

/// Per-field errors for the contact form; empty when the form is valid.
pub fn contact_errors(name: &str, email: &str, message: &str) -> BTreeMap<Field, &'static str> {
    let mut errors = BTreeMap::new();

    if name.trim().is_empty() {
        errors.insert(Field::Name, "Nome é obrigatório");
    } else if !is_valid_name(name) {
        errors.insert(Field::Name, "Nome deve ter pelo menos 2 caracteres");
    }

    if email.trim().is_empty() {
        errors.insert(Field::Email, "Email é obrigatório");
    } else if !is_valid_email(email) {
        errors.insert(Field::Email, "Email inválido");
    }

    if message.trim().is_empty() {
        errors.insert(Field::Message, "Mensagem é obrigatória");
    } else if !is_valid_message(message) {
        errors.insert(Field::Message, "Mensagem deve ter no mínimo 10 caracteres");
    }

    errors
}

pub fn validate_login(email: &str, password: &str) -> Result<(), FormError> {
    if email.is_empty() || password.is_empty() {
        return Err(FormError::MissingCredentials);
    }
    Ok(())
}

pub fn validate_registration(name: &str, email: &str, password: &str, confirm: &str) -> Result<(), FormError> {
    if name.is_empty() || email.is_empty() || password.is_empty() || confirm.is_empty() {
        return Err(FormError::MissingFields);
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(FormError::PasswordTooShort);
    }
    if password != confirm {
        return Err(FormError::PasswordMismatch);
    }
    Ok(())
}
