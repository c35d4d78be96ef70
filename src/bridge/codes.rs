// Bridge result code table

/// The bridge forgot the client's registration for this uid.
pub const UNREGISTERED_CODES: [i32; 2] = [89, -89];

/// AddMachine for a uid the bridge already knows.
pub const ALREADY_REGISTERED: i32 = 88;

pub fn is_unregistered(code: i32) -> bool {
    UNREGISTERED_CODES.contains(&code)
}

/// Stable operator-facing message for a non-zero result code.
pub fn result_message(code: i32) -> Option<&'static str> {
    let message = match code {
        -99 => "License is not activated.",
        -32 => "Machine link limit exceeded (type 2).",
        -31 => "Machine link limit exceeded (type 1).",
        -24 => "Unknown error while verifying the serial number. Contact the bridge vendor.",
        -23 => "The serial number could not be verified. Contact the bridge vendor.",
        -22 => "Cannot log in to the activation server. Check the internet connection.",
        -21 => "Cannot reach the activation server. Check the internet connection.",
        -16 => "CNC communication error: check machine power, cable, IP and port.",
        -15 => "No driver is available for this CNC type.",
        21 => "Invalid serial number.",
        22 => "Serial number is already activated on another PC.",
        88 => "Machine UID is already registered.",
        -8 => "Invalid communication handler.",
        -7 => "Wrong CNC controller type.",
        89 | -89 => "Machine UID is not registered.",
        _ => return None,
    };
    Some(message)
}
