//! Email bodies for access-code dispatch.

/// Subject and body variants for one access-code email.
pub struct AccessCodeEmailContent {
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl AccessCodeEmailContent {
    pub fn new(code: &str) -> Self {
        Self {
            subject: "Your account access code".to_string(),
            text: Self::text_template(code),
            html: Self::html_template(code),
        }
    }

    fn text_template(code: &str) -> String {
        format!(
            "Your access code is: {code}\n\n\
             Enter this code to set up your account password.\n\n\
             If you didn't request this, you can ignore this email.\n"
        )
    }

    fn html_template(code: &str) -> String {
        format!(
            r#"<div style="font-family: sans-serif; color: #333;">
  <h2>Set up your account</h2>
  <p>Use the following access code to complete your account setup:</p>
  <div style="font-size: 24px; font-weight: bold; background: #f4f4f5; padding: 12px; display: inline-block; border-radius: 8px; letter-spacing: 2px;">{code}</div>
  <p style="margin-top: 20px; font-size: 14px; color: #666;">If you didn't request this, you can ignore this email.</p>
</div>
"#
        )
    }
}
