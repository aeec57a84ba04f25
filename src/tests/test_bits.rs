/*
* Copyright (C) 2019-2022 EverX. All Rights Reserved.
*
* Licensed under the SOFTWARE EVALUATION License (the "License"); you may not use
* this file except in compliance with the License.
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific EVERX DEV software governing permissions and
* limitations under the License.
*/

use super::*;

#[test]
fn test_base64_alphabets() -> Result<()> {
    // digits 62 and 63 are where the two alphabets differ
    let data = [0xfb, 0xff, 0xfe];
    assert_eq!(base64_encode(data), "+//+");
    assert_eq!(base64_encode_url_safe(data), "-__-");
    assert_eq!(base64_decode("+//+")?, data);
    assert_eq!(base64_decode_url_safe("-__-")?, data);

    // each decoder accepts its own alphabet only
    assert!(base64_decode("-__-").is_err());
    assert!(base64_decode_url_safe("+//+").is_err());
    Ok(())
}

#[test]
fn test_base64_url_safe_padding() -> Result<()> {
    let data = [0xfb, 0xff, 0xfe, 0xff];
    assert_eq!(base64_encode(data), "+//+/w==");
    assert_eq!(base64_encode_url_safe(data), "-__-_w==");
    assert_eq!(base64_decode_url_safe("-__-_w==")?, data);
    assert!(base64_decode_url_safe("-__-A").is_err());
    Ok(())
}
