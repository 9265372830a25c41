use streamdeck::Client;

use crate::display::pad_right;
use crate::error::InboxError;

/// Button state index with the normal background.
pub const DEFAULT_STATE: u8 = 0;
/// Button state index with the "nothing pending" gold background.
pub const GOLD_STATE: u8 = 1;

/// Show the loading indicator: used between appear and the first fetch.
pub fn set_loading(client: &Client) -> Result<(), InboxError> {
    client.set_title(&pad_right("..."))?;
    client.set_state(DEFAULT_STATE)?;
    Ok(())
}

/// The standard renderer for single-count services.
///
/// Count zero clears the title and highlights the button gold; any other
/// count shows the padded numeral on the default background. A fetch error
/// renders the fault glyph best-effort: if the display update itself fails
/// while reporting a backend error, both are combined into
/// `DisplayUpdateFailed`.
pub fn render_count(client: &Client, outcome: Result<u64, &InboxError>) -> Result<(), InboxError> {
    let count = match outcome {
        Ok(count) => count,
        Err(err) => {
            let shown = client
                .set_title(&pad_right("!"))
                .and_then(|()| client.set_state(DEFAULT_STATE));
            if let Err(display_err) = shown {
                return Err(InboxError::DisplayUpdateFailed(format!(
                    "{display_err} -- while reporting: {err}"
                )));
            }
            return Ok(());
        }
    };

    if count == 0 {
        client.set_state(GOLD_STATE)?;
        client.set_title("")?;
    } else {
        client.set_state(DEFAULT_STATE)?;
        client.set_title(&pad_right(&count.to_string()))?;
    }

    Ok(())
}
